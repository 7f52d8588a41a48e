use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::FetchSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum number of memory entries; the least recently used is evicted first.
    pub memory_capacity: usize,
    pub memory_ttl: Duration,
    pub disk_ttl: Duration,
    /// `None` keeps the cache in memory only.
    pub disk_dir: Option<PathBuf>,
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_capacity: 1000,
            memory_ttl: Duration::from_secs(5 * 60),
            disk_ttl: Duration::from_secs(24 * 3600),
            disk_dir: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub fetch: FetchSettings,
    pub cache: CacheSettings,
    /// Number of workers, and so the maximum number of fetches in flight.
    pub concurrency: usize,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_interval: Duration,
    /// Undelivered pipeline events kept for the consumer; newer events are
    /// dropped while the backlog is full.
    pub event_backlog: usize,
}

impl PipelineConfig {
    /// Places the disk cache in `{root}/cache` and checkpoints in `{root}/sessions`.
    pub fn default_with_dir(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            fetch: FetchSettings::default(),
            cache: CacheSettings {
                disk_dir: Some(root.join("cache")),
                ..CacheSettings::default()
            },
            concurrency: 12,
            checkpoint_dir: root.join("sessions"),
            checkpoint_interval: Duration::from_secs(30),
            event_backlog: 1024,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::default_with_dir("linkfetch")
    }
}
