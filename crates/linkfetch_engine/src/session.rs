use std::path::Path;
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use chrono::Utc;
use linkfetch_core::{
    is_resumable, ItemId, ItemRecord, PipelineEvent, ProgressSnapshot, ProgressTracker, RunReport,
    SessionAction, SessionState, SessionStatus, StatusCounts, TransitionError, WorkItem,
    WorkerEvent,
};
use linkfetch_logging::{fetch_error, fetch_info, fetch_trace, fetch_warn};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::export::{write_partial_export, ExportError, ExportSummary};
use crate::fetch::FetchExecutor;
use crate::orchestrator::{Orchestrator, OutcomeSink, RunControl, RunSummary};
use crate::{FetchError, PipelineConfig};

const DEFAULT_PHASE: &str = "fetching";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("checkpoint for session {session_id} cannot be resumed")]
    NotResumable { session_id: String },
    #[error("session has not been started")]
    NotStarted,
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("fetch client setup failed: {0}")]
    Setup(#[from] FetchError),
}

struct Shared {
    state: Mutex<SessionState>,
    tracker: Mutex<ProgressTracker>,
    events: mpsc::SyncSender<PipelineEvent>,
    /// Held across every checkpoint write or removal, so a periodic write
    /// cannot land after the run has finished and discarded its checkpoint.
    disk: Mutex<()>,
}

impl Shared {
    /// Never blocks; the event is dropped when the consumer is behind.
    fn send(&self, event: PipelineEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(mpsc::TrySendError::Disconnected(_)) => {}
            Err(mpsc::TrySendError::Full(event)) => {
                fetch_trace!("Event backlog full, dropping {:?}", event);
            }
        }
    }

    fn report(&self) -> RunReport {
        let counts = self.state.lock().counts();
        RunReport {
            succeeded: counts.succeeded as u64,
            cached: counts.cached as u64,
            failed: counts.failed as u64,
            elapsed: self.tracker.lock().report().elapsed,
        }
    }

    /// Writes a checkpoint from a copy of the state and records when it was taken.
    fn checkpoint(&self, store: &CheckpointStore) -> Result<(), CheckpointError> {
        let _disk = self.disk.lock();
        let snapshot = self.state.lock().clone();
        self.save(store, &snapshot)
    }

    /// Periodic variant: writes only while the session is still running.
    fn checkpoint_running(&self, store: &CheckpointStore) -> Result<bool, CheckpointError> {
        let _disk = self.disk.lock();
        let snapshot = {
            let state = self.state.lock();
            if state.status != SessionStatus::Running {
                return Ok(false);
            }
            state.clone()
        };
        self.save(store, &snapshot)?;
        Ok(true)
    }

    fn discard_checkpoint(
        &self,
        store: &CheckpointStore,
        session_id: &str,
    ) -> Result<bool, CheckpointError> {
        let _disk = self.disk.lock();
        store.remove(session_id)
    }

    fn save(&self, store: &CheckpointStore, snapshot: &SessionState) -> Result<(), CheckpointError> {
        let saved_at = store.save(snapshot)?;
        self.state.lock().last_checkpoint = Some(saved_at);
        Ok(())
    }
}

/// Feeds worker events into the session state and the progress tracker.
struct SessionSink {
    shared: Arc<Shared>,
}

impl OutcomeSink for SessionSink {
    fn emit(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Dispatched { id } => {
                self.shared.state.lock().mark_in_flight(id);
            }
            WorkerEvent::Finished(outcome) => {
                if !self.shared.state.lock().apply_outcome(&outcome) {
                    return;
                }
                let (line, snapshot) = {
                    let mut tracker = self.shared.tracker.lock();
                    let now = Instant::now();
                    tracker.on_outcome_at(outcome.kind, now);
                    (tracker.progress_line(now), tracker.snapshot_at(now))
                };
                if let Some(line) = line {
                    fetch_info!("{}", line);
                }
                self.shared.send(PipelineEvent::item_finished(&outcome));
                self.shared.send(PipelineEvent::Progress(snapshot));
            }
        }
    }
}

struct RunningTask {
    run: JoinHandle<RunSummary>,
    ticker_token: CancellationToken,
    ticker: JoinHandle<()>,
}

/// Drives one session: start, pause, resume and cancel over an [`Orchestrator`],
/// with durable checkpoints and partial export.
///
/// `start` and `resume` spawn onto the current Tokio runtime.
pub struct SessionController {
    config: PipelineConfig,
    orchestrator: Orchestrator,
    checkpoints: CheckpointStore,
    shared: Arc<Shared>,
    events: mpsc::Receiver<PipelineEvent>,
    control: RunControl,
    task: Option<RunningTask>,
}

impl SessionController {
    /// Builds the cache and the HTTP fetcher from `config`.
    pub fn new(config: PipelineConfig, session_id: impl Into<String>) -> Result<Self, SessionError> {
        let orchestrator = build_orchestrator(&config)?;
        Ok(Self::with_orchestrator(config, session_id, orchestrator))
    }

    pub fn with_orchestrator(
        config: PipelineConfig,
        session_id: impl Into<String>,
        orchestrator: Orchestrator,
    ) -> Self {
        Self::from_state(config, orchestrator, SessionState::new(session_id, Vec::new()))
    }

    /// Loads the checkpoint of `session_id` into a paused controller.
    pub fn restore(config: PipelineConfig, session_id: &str) -> Result<Self, SessionError> {
        let orchestrator = build_orchestrator(&config)?;
        Self::restore_with(config, session_id, orchestrator)
    }

    pub fn restore_with(
        config: PipelineConfig,
        session_id: &str,
        orchestrator: Orchestrator,
    ) -> Result<Self, SessionError> {
        let checkpoints = CheckpointStore::new(config.checkpoint_dir.clone());
        let checkpoint = checkpoints.load(session_id)?;
        if !is_resumable(&checkpoint) || checkpoint.state.session_id != session_id {
            return Err(SessionError::NotResumable {
                session_id: session_id.to_string(),
            });
        }
        let mut state = checkpoint.state;
        state.recover();
        let counts = state.counts();
        fetch_info!(
            "Restored session {}: {} of {} items already done",
            session_id,
            counts.terminal(),
            state.items.len()
        );
        Ok(Self::from_state(config, orchestrator, state))
    }

    fn from_state(config: PipelineConfig, orchestrator: Orchestrator, state: SessionState) -> Self {
        let total = state.items.len() as u64;
        let mut tracker = ProgressTracker::new(DEFAULT_PHASE, total);
        seed_tracker(&mut tracker, state.counts(), total);

        let (events_tx, events) = mpsc::sync_channel(config.event_backlog);
        Self {
            checkpoints: CheckpointStore::new(config.checkpoint_dir.clone()),
            config,
            orchestrator,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                tracker: Mutex::new(tracker),
                events: events_tx,
                disk: Mutex::new(()),
            }),
            events,
            control: RunControl::new(),
            task: None,
        }
    }

    pub fn session_id(&self) -> String {
        self.shared.state.lock().session_id.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.state.lock().status
    }

    pub fn counts(&self) -> StatusCounts {
        self.shared.state.lock().counts()
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        self.orchestrator.cache()
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Stopped -> Running with a fresh queue.
    pub fn start(&mut self, items: Vec<WorkItem>) -> Result<(), SessionError> {
        let queue = {
            let mut state = self.shared.state.lock();
            if state.status != SessionStatus::Stopped {
                return Err(TransitionError::InvalidTransition {
                    from: state.status,
                    action: SessionAction::Start,
                }
                .into());
            }
            let session_id = state.session_id.clone();
            *state = SessionState::new(session_id, items);
            state.start()?
        };
        let phase = self.shared.tracker.lock().phase().to_string();
        *self.shared.tracker.lock() = ProgressTracker::new(phase, queue.len() as u64);

        fetch_info!(
            "Session {} started with {} items",
            self.session_id(),
            queue.len()
        );
        self.shared.send(PipelineEvent::StatusChanged(SessionStatus::Running));
        self.spawn(queue);
        Ok(())
    }

    /// Stops dispatch at the next item boundary, waits for in-flight fetches
    /// and writes a checkpoint.
    ///
    /// A checkpoint failure is returned, but the session stays paused and its
    /// results stay available through [`SessionController::export_partial`].
    pub async fn pause(&mut self) -> Result<(), SessionError> {
        self.require(SessionStatus::Running, SessionAction::Pause)?;
        self.control.request_pause();
        self.join_task().await;

        self.shared.state.lock().pause()?;
        fetch_info!("Session {} paused: {}", self.session_id(), self.describe_counts());
        self.shared.send(PipelineEvent::StatusChanged(SessionStatus::Paused));

        self.shared.checkpoint(&self.checkpoints).map_err(|err| {
            fetch_error!("Failed to checkpoint session {}: {}", self.session_id(), err);
            SessionError::from(err)
        })
    }

    /// Reloads the checkpoint and dispatches every item that is not terminal.
    pub async fn resume(&mut self) -> Result<(), SessionError> {
        self.require(SessionStatus::Paused, SessionAction::Resume)?;
        let session_id = self.session_id();
        let checkpoint = self.checkpoints.load(&session_id)?;
        if !is_resumable(&checkpoint) {
            return Err(SessionError::NotResumable { session_id });
        }

        let queue = {
            let mut state = self.shared.state.lock();
            let mut reloaded = checkpoint.state;
            if !merge_terminal(&state, &mut reloaded) {
                return Err(SessionError::NotResumable { session_id });
            }
            reloaded.recover();
            *state = reloaded;
            state.resume()?
        };
        {
            let counts = self.counts();
            let total = counts.pending as u64 + counts.in_flight as u64 + counts.terminal() as u64;
            let mut tracker = self.shared.tracker.lock();
            let phase = tracker.phase().to_string();
            tracker.set_phase(phase, total);
            seed_tracker(&mut tracker, counts, total);
        }

        fetch_info!("Session {} resumed with {} items left", session_id, queue.len());
        self.shared.send(PipelineEvent::StatusChanged(SessionStatus::Running));
        self.spawn(queue);
        Ok(())
    }

    /// Stops dispatch, lets in-flight fetches settle and discards the checkpoint.
    /// Completed results remain exportable.
    pub async fn cancel(&mut self) -> Result<(), SessionError> {
        let status = self.status();
        if status == SessionStatus::Stopped {
            return Err(TransitionError::InvalidTransition {
                from: status,
                action: SessionAction::Cancel,
            }
            .into());
        }
        self.control.request_cancel();
        self.join_task().await;

        self.shared.state.lock().cancel()?;
        fetch_info!("Session {} cancelled: {}", self.session_id(), self.describe_counts());
        self.shared.send(PipelineEvent::StatusChanged(SessionStatus::Stopped));
        let session_id = self.session_id();
        self.shared.discard_checkpoint(&self.checkpoints, &session_id)?;
        Ok(())
    }

    /// Waits for the current run to end, by completion or by a pause/cancel
    /// requested elsewhere, and returns the totals so far.
    pub async fn wait(&mut self) -> Result<RunReport, SessionError> {
        if self.task.is_none() && self.shared.state.lock().items.is_empty() {
            return Err(SessionError::NotStarted);
        }
        self.join_task().await;
        Ok(self.report())
    }

    /// Terminal items in queue order, as of this call. Safe while running.
    pub fn export_partial(&self) -> Vec<ItemRecord> {
        self.shared.state.lock().terminal_records()
    }

    /// Writes [`SessionController::export_partial`] to `{dir}/{stem}_partial_{timestamp}.json`.
    pub fn export_partial_to(&self, dir: &Path, stem: &str) -> Result<ExportSummary, SessionError> {
        let (session_id, counts, records) = {
            let state = self.shared.state.lock();
            (state.session_id.clone(), state.counts(), state.terminal_records())
        };
        let summary = write_partial_export(dir, stem, &session_id, counts, &records, Utc::now())?;
        fetch_info!(
            "Exported {} results to {:?}",
            summary.row_count,
            summary.output_path
        );
        Ok(summary)
    }

    /// Whether the checkpoint on disk for this session can be resumed.
    pub fn is_resumable(&self) -> bool {
        self.checkpoints
            .load(&self.session_id())
            .map(|checkpoint| is_resumable(&checkpoint))
            .unwrap_or(false)
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.shared.tracker.lock().snapshot()
    }

    pub fn report(&self) -> RunReport {
        self.shared.report()
    }

    /// Starts a new progress phase; run totals carry over.
    pub fn set_phase(&self, phase: impl Into<String>, total: u64) {
        self.shared.tracker.lock().set_phase(phase, total);
    }

    pub fn try_recv(&self) -> Option<PipelineEvent> {
        self.events.try_recv().ok()
    }

    fn require(&self, expected: SessionStatus, action: SessionAction) -> Result<(), SessionError> {
        let from = self.status();
        if from != expected {
            return Err(TransitionError::InvalidTransition { from, action }.into());
        }
        Ok(())
    }

    fn describe_counts(&self) -> String {
        let counts = self.counts();
        format!(
            "{} fetched, {} cached, {} failed, {} pending",
            counts.succeeded,
            counts.cached,
            counts.failed,
            counts.pending + counts.in_flight
        )
    }

    fn spawn(&mut self, queue: Vec<(ItemId, WorkItem)>) {
        self.control.reset();
        let orchestrator = self.orchestrator.clone();
        let control = self.control.clone();
        let shared = Arc::clone(&self.shared);
        let checkpoints = self.checkpoints.clone();
        let concurrency = self.config.concurrency;
        let sink: Arc<dyn OutcomeSink> = Arc::new(SessionSink {
            shared: Arc::clone(&shared),
        });

        let run = tokio::spawn(async move {
            let summary = orchestrator.run(queue, concurrency, &control, sink).await;
            if summary.stopped_by.is_none() {
                complete_run(&shared, &checkpoints);
            }
            summary
        });

        let ticker_token = CancellationToken::new();
        let ticker = spawn_checkpoint_ticker(
            Arc::clone(&self.shared),
            self.checkpoints.clone(),
            self.config.checkpoint_interval,
            ticker_token.clone(),
        );
        self.task = Some(RunningTask {
            run,
            ticker_token,
            ticker,
        });
    }

    async fn join_task(&mut self) -> Option<RunSummary> {
        let task = self.task.take()?;
        let summary = match task.run.await {
            Ok(summary) => Some(summary),
            Err(err) => {
                fetch_error!("Session run task failed: {}", err);
                None
            }
        };
        task.ticker_token.cancel();
        let _ = task.ticker.await;
        summary
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            self.control.request_pause();
            task.ticker_token.cancel();
        }
    }
}

fn build_orchestrator(config: &PipelineConfig) -> Result<Orchestrator, SessionError> {
    let cache = Arc::new(CacheStore::new(&config.cache));
    let fetcher = Arc::new(FetchExecutor::new(config.fetch.clone())?);
    Ok(Orchestrator::new(cache, fetcher))
}

/// Every item reached a terminal state without a pause or cancel.
fn complete_run(shared: &Shared, checkpoints: &CheckpointStore) {
    let finished = {
        let _disk = shared.disk.lock();
        let finished = shared.state.lock().finish();
        if finished.is_ok() {
            let session_id = shared.state.lock().session_id.clone();
            if let Err(err) = checkpoints.remove(&session_id) {
                fetch_warn!("Failed to discard checkpoint for {}: {}", session_id, err);
            }
        }
        finished
    };
    match finished {
        Ok(()) => {
            let session_id = shared.state.lock().session_id.clone();
            shared.send(PipelineEvent::StatusChanged(SessionStatus::Stopped));
            fetch_info!("Session {} complete: {}", session_id, shared.report());
        }
        Err(err) => {
            // Items lost to a failed worker stay pending; keep them resumable.
            fetch_error!("Run ended with unfinished items: {}", err);
            let _ = shared.state.lock().pause();
            if let Err(err) = shared.checkpoint(checkpoints) {
                fetch_error!("Failed to checkpoint unfinished run: {}", err);
            }
            shared.send(PipelineEvent::StatusChanged(SessionStatus::Paused));
        }
    }
}

fn spawn_checkpoint_ticker(
    shared: Arc<Shared>,
    checkpoints: CheckpointStore,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = shared.checkpoint_running(&checkpoints) {
                        fetch_warn!("Periodic checkpoint failed: {}", err);
                    }
                }
            }
        }
    })
}

/// Sets the tracker's progress and run totals from the items already terminal.
fn seed_tracker(tracker: &mut ProgressTracker, counts: StatusCounts, total: u64) {
    tracker.set_completed(counts.terminal() as u64, total);
    tracker.seed_totals(RunReport {
        succeeded: counts.succeeded as u64,
        cached: counts.cached as u64,
        failed: counts.failed as u64,
        ..RunReport::default()
    });
}

/// Copies terminal results held only in memory into a reloaded state, so an
/// older checkpoint never drops completed work. Returns false when the two
/// states describe different queues.
fn merge_terminal(current: &SessionState, reloaded: &mut SessionState) -> bool {
    if current.items.len() != reloaded.items.len() {
        return false;
    }
    for (live, saved) in current.items.iter().zip(reloaded.items.iter_mut()) {
        if live.item != saved.item {
            return false;
        }
        if live.status.is_terminal() && !saved.status.is_terminal() {
            *saved = live.clone();
        }
    }
    true
}
