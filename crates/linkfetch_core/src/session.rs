use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{FetchResult, ItemId, ItemStatus, Outcome, WorkItem};

pub const CHECKPOINT_FORMAT: &str = "linkfetch-session";
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionStatus {
    Running,
    Paused,
    #[default]
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Start,
    Pause,
    Resume,
    Finish,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {action:?} a session that is {from:?}")]
    InvalidTransition {
        from: SessionStatus,
        action: SessionAction,
    },
    #[error("session still has {pending} unfinished items")]
    Unfinished { pending: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub item: WorkItem,
    pub status: ItemStatus,
    pub result: Option<FetchResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub cached: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn terminal(&self) -> usize {
        self.cached + self.succeeded + self.failed
    }
}

/// Everything needed to continue a run: the whole queue with per-item status and results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub status: SessionStatus,
    pub items: Vec<ItemRecord>,
    pub created_at: DateTime<Utc>,
    pub last_checkpoint: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, items: Vec<WorkItem>) -> Self {
        let items = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| ItemRecord {
                id: index as ItemId,
                item,
                status: ItemStatus::Pending,
                result: None,
            })
            .collect();
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Stopped,
            items,
            created_at: Utc::now(),
            last_checkpoint: None,
        }
    }

    /// Stopped -> Running. Returns the items to dispatch, in queue order.
    pub fn start(&mut self) -> Result<Vec<(ItemId, WorkItem)>, TransitionError> {
        self.transition(SessionAction::Start, SessionStatus::Stopped, SessionStatus::Running)?;
        Ok(self.pending_queue())
    }

    /// Running -> Paused. Anything still marked in flight goes back to Pending.
    pub fn pause(&mut self) -> Result<(), TransitionError> {
        self.transition(SessionAction::Pause, SessionStatus::Running, SessionStatus::Paused)?;
        self.release_in_flight();
        Ok(())
    }

    /// Paused -> Running. Terminal items are never returned.
    pub fn resume(&mut self) -> Result<Vec<(ItemId, WorkItem)>, TransitionError> {
        self.transition(SessionAction::Resume, SessionStatus::Paused, SessionStatus::Running)?;
        self.release_in_flight();
        Ok(self.pending_queue())
    }

    /// Running -> Stopped once every item is terminal.
    pub fn finish(&mut self) -> Result<(), TransitionError> {
        if self.status != SessionStatus::Running {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                action: SessionAction::Finish,
            });
        }
        let counts = self.counts();
        if counts.terminal() != self.items.len() {
            return Err(TransitionError::Unfinished {
                pending: self.items.len() - counts.terminal(),
            });
        }
        self.status = SessionStatus::Stopped;
        Ok(())
    }

    /// Running or Paused -> Stopped, keeping completed results.
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        if self.status == SessionStatus::Stopped {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                action: SessionAction::Cancel,
            });
        }
        self.status = SessionStatus::Stopped;
        self.release_in_flight();
        Ok(())
    }

    /// Brings a state loaded from a checkpoint written while running back to Paused.
    pub fn recover(&mut self) {
        if self.status == SessionStatus::Running {
            self.status = SessionStatus::Paused;
        }
        self.release_in_flight();
    }

    pub fn mark_in_flight(&mut self, id: ItemId) -> bool {
        match self.record_mut(id) {
            Some(record) if record.status == ItemStatus::Pending => {
                record.status = ItemStatus::InFlight;
                true
            }
            _ => false,
        }
    }

    /// Records a terminal outcome. An item that is already terminal keeps its first result.
    pub fn apply_outcome(&mut self, outcome: &Outcome) -> bool {
        match self.record_mut(outcome.id) {
            Some(record) if !record.status.is_terminal() => {
                record.status = outcome.kind.status();
                record.result = Some(outcome.result.clone());
                true
            }
            _ => false,
        }
    }

    pub fn pending_queue(&self) -> Vec<(ItemId, WorkItem)> {
        self.items
            .iter()
            .filter(|record| record.status == ItemStatus::Pending)
            .map(|record| (record.id, record.item.clone()))
            .collect()
    }

    /// Terminal records in queue order; never includes pending or in-flight items.
    pub fn terminal_records(&self) -> Vec<ItemRecord> {
        self.items
            .iter()
            .filter(|record| record.status.is_terminal())
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|record| record.status.is_terminal())
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in &self.items {
            match record.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::InFlight => counts.in_flight += 1,
                ItemStatus::Cached => counts.cached += 1,
                ItemStatus::Succeeded => counts.succeeded += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn transition(
        &mut self,
        action: SessionAction,
        from: SessionStatus,
        to: SessionStatus,
    ) -> Result<(), TransitionError> {
        if self.status != from {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                action,
            });
        }
        self.status = to;
        Ok(())
    }

    fn release_in_flight(&mut self) {
        for record in &mut self.items {
            if record.status == ItemStatus::InFlight {
                record.status = ItemStatus::Pending;
            }
        }
    }

    fn record_mut(&mut self, id: ItemId) -> Option<&mut ItemRecord> {
        self.items.get_mut(id as usize).filter(|record| record.id == id)
    }
}

/// Durable, self-describing envelope around a [`SessionState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format: String,
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub state: SessionState,
}

impl Checkpoint {
    pub fn new(state: SessionState, saved_at: DateTime<Utc>) -> Self {
        Self {
            format: CHECKPOINT_FORMAT.to_string(),
            version: CHECKPOINT_VERSION,
            saved_at,
            state,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.format == CHECKPOINT_FORMAT && self.version == CHECKPOINT_VERSION
    }
}

/// A checkpoint can be resumed when it has our format and version, describes an
/// unfinished session, and its records are internally consistent.
pub fn is_resumable(checkpoint: &Checkpoint) -> bool {
    if !checkpoint.is_compatible() || checkpoint.state.status == SessionStatus::Stopped {
        return false;
    }
    checkpoint
        .state
        .items
        .iter()
        .enumerate()
        .all(|(index, record)| {
            record.id == index as ItemId && record.status.is_terminal() == record.result.is_some()
        })
}
