use serde::{Deserialize, Serialize};

/// Position of a work item in its session queue. Stable for the lifetime of a session.
pub type ItemId = u64;

/// One unit of fetch work as supplied by the input collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// Opaque correlation key, e.g. the product code from the spreadsheet row.
    pub key: String,
    /// Address to fetch.
    pub target: String,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ItemStatus {
    #[default]
    Pending,
    InFlight,
    Cached,
    Succeeded,
    Failed,
}

impl ItemStatus {
    /// Terminal items are never dispatched again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemStatus::Cached | ItemStatus::Succeeded | ItemStatus::Failed
        )
    }
}
