use std::path::PathBuf;

use linkfetch_core::{FailureKind, FailureReason};
use thiserror::Error;

/// Raw response for one successful network attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub target: String,
    pub final_url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Failure of a single attempt; retry decisions are made on `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn into_reason(self) -> FailureReason {
        FailureReason::new(self.kind, self.message)
    }
}

/// Internal to the disk tier. The cache store downgrades every variant to a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt cache entry {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
