//! Linkfetch core: pure domain types, progress statistics and the session state machine.
mod event;
mod item;
mod progress;
mod result;
mod session;

pub use event::{Outcome, OutcomeKind, PipelineEvent, WorkerEvent};
pub use item::{ItemId, ItemStatus, WorkItem};
pub use progress::{
    format_duration, Eta, ProgressSnapshot, ProgressTracker, RunReport, MAX_ETA, MIN_RATE,
    SMOOTHING_ALPHA,
};
pub use result::{FailureKind, FailureReason, FetchOutcome, FetchResult, Payload};
pub use session::{
    is_resumable, Checkpoint, ItemRecord, SessionAction, SessionState, SessionStatus,
    StatusCounts, TransitionError, CHECKPOINT_FORMAT, CHECKPOINT_VERSION,
};
