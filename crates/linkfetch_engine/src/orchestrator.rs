use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use linkfetch_core::{
    FailureKind, FailureReason, FetchResult, ItemId, Outcome, OutcomeKind, WorkItem, WorkerEvent,
};
use linkfetch_logging::{fetch_debug, fetch_error, fetch_info};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::cache::{CacheStore, CachedValue};
use crate::fetch::Fetcher;
use crate::target::normalize_key;

pub trait OutcomeSink: Send + Sync {
    fn emit(&self, event: WorkerEvent);
}

pub struct ChannelOutcomeSink {
    tx: mpsc::Sender<WorkerEvent>,
}

impl ChannelOutcomeSink {
    pub fn new(tx: mpsc::Sender<WorkerEvent>) -> Self {
        Self { tx }
    }
}

impl OutcomeSink for ChannelOutcomeSink {
    fn emit(&self, event: WorkerEvent) {
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSignal {
    Continue,
    Pause,
    Cancel,
}

impl RunSignal {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunSignal::Pause,
            2 => RunSignal::Cancel,
            _ => RunSignal::Continue,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RunSignal::Continue => 0,
            RunSignal::Pause => 1,
            RunSignal::Cancel => 2,
        }
    }
}

/// Shared stop flag. Workers check it before taking the next item, so a
/// request never interrupts a fetch that is already in flight.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    signal: Arc<AtomicU8>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> RunSignal {
        RunSignal::from_u8(self.signal.load(Ordering::SeqCst))
    }

    pub fn request_pause(&self) {
        self.set(RunSignal::Pause);
    }

    pub fn request_cancel(&self) {
        self.set(RunSignal::Cancel);
    }

    pub fn reset(&self) {
        self.set(RunSignal::Continue);
    }

    fn set(&self, signal: RunSignal) {
        self.signal.store(signal.as_u8(), Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Items that reached a terminal outcome during this run.
    pub processed: usize,
    /// Items never taken off the queue, in queue order.
    pub remaining: Vec<(ItemId, WorkItem)>,
    pub stopped_by: Option<RunSignal>,
}

#[derive(Default)]
struct KeyLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    async fn lock(self: &Arc<Self>, key: &str) -> KeyGuard {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(key.to_string()).or_default())
        };
        let guard = Arc::clone(&slot).lock_owned().await;
        KeyGuard {
            locks: Arc::clone(self),
            key: key.to_string(),
            slot,
            guard: Some(guard),
        }
    }
}

/// Holds the per-key lock; the map entry goes away with its last holder.
struct KeyGuard {
    locks: Arc<KeyLocks>,
    key: String,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut slots = self.locks.slots.lock();
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.key);
        }
    }
}

/// Bounded worker pool over a shared queue. Each item is looked up in the
/// cache first and fetched only on a miss; successful results are cached.
#[derive(Clone)]
pub struct Orchestrator {
    cache: Arc<CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    key_locks: Arc<KeyLocks>,
}

impl Orchestrator {
    pub fn new(cache: Arc<CacheStore>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache,
            fetcher,
            key_locks: Arc::new(KeyLocks::default()),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Terminal outcome for one item. Workers holding the same normalized key
    /// are serialized, so a duplicate sees the first one's cached result.
    pub async fn process(&self, id: ItemId, item: WorkItem) -> Outcome {
        let key = normalize_key(&item.target);
        let _guard = self.key_locks.lock(&key).await;

        let started = Instant::now();
        if let Some(entry) = self.cache.lookup(&key) {
            let result = FetchResult::ok(
                entry.value.payload,
                started.elapsed(),
                entry.value.fetched_bytes,
                0,
            );
            return Outcome {
                id,
                item,
                kind: OutcomeKind::Cached,
                result,
            };
        }

        let result = self.fetcher.fetch(&item.target).await;
        if let Some(payload) = result.payload() {
            self.cache.store(
                &key,
                CachedValue {
                    payload: payload.clone(),
                    fetched_bytes: result.bytes,
                },
                self.cache.disk_ttl(),
            );
        }
        Outcome {
            id,
            kind: OutcomeKind::from_fetch(&result),
            item,
            result,
        }
    }

    /// Runs `items` with at most `concurrency` in flight until the queue is
    /// empty or `control` asks to stop.
    pub async fn run(
        &self,
        items: Vec<(ItemId, WorkItem)>,
        concurrency: usize,
        control: &RunControl,
        sink: Arc<dyn OutcomeSink>,
    ) -> RunSummary {
        let total = items.len();
        let workers = concurrency.max(1).min(total.max(1));
        fetch_info!("Dispatching {} items to {} workers", total, workers);

        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        let handles = (0..workers)
            .map(|worker| {
                let this = self.clone();
                let queue = Arc::clone(&queue);
                let control = control.clone();
                let sink = Arc::clone(&sink);
                tokio::spawn(async move { this.worker_loop(worker, queue, control, sink).await })
            })
            .collect::<Vec<_>>();

        let mut processed = 0;
        for joined in join_all(handles).await {
            match joined {
                Ok(count) => processed += count,
                Err(err) => fetch_error!("Worker task failed: {}", err),
            }
        }

        let remaining: Vec<_> = queue.lock().drain(..).collect();
        let stopped_by = match control.signal() {
            RunSignal::Continue => None,
            signal => Some(signal),
        };
        RunSummary {
            processed,
            remaining,
            stopped_by,
        }
    }

    async fn worker_loop(
        &self,
        worker: usize,
        queue: Arc<Mutex<VecDeque<(ItemId, WorkItem)>>>,
        control: RunControl,
        sink: Arc<dyn OutcomeSink>,
    ) -> usize {
        let mut processed = 0;
        loop {
            if control.signal() != RunSignal::Continue {
                fetch_debug!("Worker {} stopping on {:?}", worker, control.signal());
                break;
            }
            let Some((id, item)) = queue.lock().pop_front() else {
                break;
            };
            sink.emit(WorkerEvent::Dispatched { id });
            let outcome = self.process_isolated(id, item).await;
            sink.emit(WorkerEvent::Finished(outcome));
            processed += 1;
        }
        processed
    }

    /// A panicking fetcher or extractor fails its own item instead of the worker.
    async fn process_isolated(&self, id: ItemId, item: WorkItem) -> Outcome {
        let this = self.clone();
        let task_item = item.clone();
        match tokio::spawn(async move { this.process(id, task_item).await }).await {
            Ok(outcome) => outcome,
            Err(err) => {
                fetch_error!("Processing of item {} aborted: {}", id, err);
                Outcome {
                    id,
                    item,
                    kind: OutcomeKind::Failed,
                    result: FetchResult::failed(
                        FailureReason::new(FailureKind::Cancelled, err.to_string()),
                        Duration::ZERO,
                        0,
                    ),
                }
            }
        }
    }
}
