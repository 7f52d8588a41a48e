use serde::{Deserialize, Serialize};

use crate::{FetchResult, ItemId, ItemStatus, ProgressSnapshot, SessionStatus, WorkItem};

/// How a work item reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Cached,
    Succeeded,
    Failed,
}

impl OutcomeKind {
    pub fn status(self) -> ItemStatus {
        match self {
            OutcomeKind::Cached => ItemStatus::Cached,
            OutcomeKind::Succeeded => ItemStatus::Succeeded,
            OutcomeKind::Failed => ItemStatus::Failed,
        }
    }

    pub fn from_fetch(result: &FetchResult) -> Self {
        if result.is_ok() {
            OutcomeKind::Succeeded
        } else {
            OutcomeKind::Failed
        }
    }
}

/// Terminal outcome for one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub id: ItemId,
    pub item: WorkItem,
    pub kind: OutcomeKind,
    pub result: FetchResult,
}

/// Messages from orchestrator workers to their sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A worker took the item off the queue.
    Dispatched { id: ItemId },
    Finished(Outcome),
}

/// Messages pushed to the progress display collaborator.
///
/// Events carry no payloads; results are read through the session export.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Progress(ProgressSnapshot),
    ItemFinished {
        id: ItemId,
        key: String,
        kind: OutcomeKind,
    },
    StatusChanged(SessionStatus),
}

impl PipelineEvent {
    pub fn item_finished(outcome: &Outcome) -> Self {
        PipelineEvent::ItemFinished {
            id: outcome.id,
            key: outcome.item.key.clone(),
            kind: outcome.kind,
        }
    }
}
