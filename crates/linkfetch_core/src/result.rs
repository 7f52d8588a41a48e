use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Extracted data for a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Stored as one base64 string so checkpoints stay close to payload size.
    Data(#[serde(with = "base64_bytes")] Vec<u8>),
    /// The page was well-formed but carried nothing to extract.
    Empty,
}

impl Payload {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Payload::Data(bytes) => Some(bytes),
            Payload::Empty => None,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchOutcome {
    Ok(Payload),
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    pub outcome: FetchOutcome,
    pub elapsed: Duration,
    /// Size of the fetched body, before extraction.
    pub bytes: u64,
    /// Network attempts made; zero for results served from cache.
    pub attempts: u32,
}

impl FetchResult {
    pub fn ok(payload: Payload, elapsed: Duration, bytes: u64, attempts: u32) -> Self {
        Self {
            outcome: FetchOutcome::Ok(payload),
            elapsed,
            bytes,
            attempts,
        }
    }

    pub fn failed(reason: FailureReason, elapsed: Duration, attempts: u32) -> Self {
        Self {
            outcome: FetchOutcome::Failed(reason),
            elapsed,
            bytes: 0,
            attempts,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, FetchOutcome::Ok(_))
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.outcome {
            FetchOutcome::Ok(payload) => Some(payload),
            FetchOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.outcome {
            FetchOutcome::Ok(_) => None,
            FetchOutcome::Failed(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    InvalidTarget,
    /// 404 or 410.
    NotFound(u16),
    HttpStatus(u16),
    Timeout,
    ConnectionReset,
    Network,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    Extraction,
    Cancelled,
}

impl FailureKind {
    /// Transient failures are retried with backoff; everything else is surfaced at once.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::HttpStatus(_)
                | FailureKind::Timeout
                | FailureKind::ConnectionReset
                | FailureKind::Network
        )
    }

    pub fn from_status(code: u16) -> Self {
        match code {
            404 | 410 => FailureKind::NotFound(code),
            _ => FailureKind::HttpStatus(code),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidTarget => write!(f, "invalid target"),
            FailureKind::NotFound(code) => write!(f, "not found ({code})"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::ConnectionReset => write!(f, "connection reset"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::Extraction => write!(f, "extraction failed"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_terminal_but_server_errors_retry() {
        assert!(!FailureKind::from_status(404).is_retryable());
        assert!(!FailureKind::from_status(410).is_retryable());
        assert!(FailureKind::from_status(503).is_retryable());
        assert!(FailureKind::from_status(429).is_retryable());
        assert!(FailureKind::Timeout.is_retryable());
        assert!(!FailureKind::InvalidTarget.is_retryable());
    }

    #[test]
    fn failed_result_has_no_payload() {
        let result = FetchResult::failed(
            FailureReason::new(FailureKind::Timeout, "deadline"),
            Duration::from_millis(5),
            3,
        );
        assert!(!result.is_ok());
        assert!(result.payload().is_none());
        assert_eq!(result.failure().unwrap().to_string(), "timeout: deadline");
    }
}
