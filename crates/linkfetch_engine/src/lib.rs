//! Linkfetch engine: cache tiers, HTTP fetching, the worker pool and resumable sessions.
mod cache;
mod checkpoint;
mod config;
mod decode;
mod disk_tier;
mod export;
mod extract;
mod fetch;
mod memory_tier;
mod orchestrator;
mod persist;
mod rate_limit;
mod retry;
mod session;
mod target;
mod types;

pub use cache::{CacheEntry, CacheStats, CacheStore, CachedValue, SweepReport, Tier};
pub use checkpoint::{CheckpointError, CheckpointStore};
pub use config::{CacheSettings, PipelineConfig};
pub use decode::{decode_body, CharsetSource, DecodeError, DecodedText};
pub use disk_tier::{DiskTier, DiskUsage};
pub use export::{partial_export_filename, write_partial_export, ExportError, ExportSummary};
pub use extract::{Extractor, TextExtractor};
pub use fetch::{FetchExecutor, FetchSettings, Fetcher, ReqwestTransport, Transport};
pub use linkfetch_core::{FailureKind, FailureReason, FetchResult, Payload};
pub use memory_tier::MemoryTier;
pub use orchestrator::{ChannelOutcomeSink, Orchestrator, OutcomeSink, RunControl, RunSignal, RunSummary};
pub use persist::{ensure_dir, AtomicFileWriter, PersistError};
pub use rate_limit::RateLimiter;
pub use retry::BackoffPolicy;
pub use session::{SessionController, SessionError};
pub use target::{key_digest, normalize_key, parse_target};
pub use types::{CacheError, FetchError, FetchedPage};
