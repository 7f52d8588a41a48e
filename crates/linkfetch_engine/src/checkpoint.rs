use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use linkfetch_core::{Checkpoint, SessionState, CHECKPOINT_FORMAT, CHECKPOINT_VERSION};
use linkfetch_logging::fetch_info;
use serde::Deserialize;
use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};

const CHECKPOINT_SUFFIX: &str = ".checkpoint.ron";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode checkpoint: {0}")]
    Encode(String),
    #[error("failed to decode checkpoint: {0}")]
    Decode(String),
    #[error("incompatible checkpoint: {found}")]
    Incompatible { found: String },
    #[error("no checkpoint for session {0}")]
    NotFound(String),
}

impl From<PersistError> for CheckpointError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::Io(err) => CheckpointError::Io(err),
            err @ PersistError::Dir { .. } => CheckpointError::Io(io::Error::other(err.to_string())),
        }
    }
}

/// Just enough of the envelope to reject foreign or newer files before
/// decoding the state.
#[derive(Debug, Deserialize)]
struct EnvelopeHeader {
    format: String,
    version: u32,
}

/// One RON file per session under a directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(file_name(session_id))
    }

    /// Writes the state atomically and returns the time stamped into it.
    pub fn save(&self, state: &SessionState) -> Result<DateTime<Utc>, CheckpointError> {
        let saved_at = Utc::now();
        let mut snapshot = state.clone();
        snapshot.last_checkpoint = Some(saved_at);
        let checkpoint = Checkpoint::new(snapshot, saved_at);

        let content = ron::ser::to_string_pretty(&checkpoint, ron::ser::PrettyConfig::new())
            .map_err(|err| CheckpointError::Encode(err.to_string()))?;
        let writer = AtomicFileWriter::new(self.dir.clone());
        let path = writer.write(&file_name(&state.session_id), content.as_bytes())?;
        fetch_info!("Saved checkpoint for {} to {:?}", state.session_id, path);
        Ok(saved_at)
    }

    pub fn load(&self, session_id: &str) -> Result<Checkpoint, CheckpointError> {
        let path = self.path_for(session_id);
        let content = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(session_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let header: EnvelopeHeader =
            ron::from_str(&content).map_err(|err| CheckpointError::Decode(err.to_string()))?;
        if header.format != CHECKPOINT_FORMAT || header.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Incompatible {
                found: format!("{} v{}", header.format, header.version),
            });
        }

        let checkpoint: Checkpoint =
            ron::from_str(&content).map_err(|err| CheckpointError::Decode(err.to_string()))?;
        fetch_info!(
            "Loaded checkpoint for {} saved at {}",
            session_id,
            checkpoint.saved_at
        );
        Ok(checkpoint)
    }

    pub fn remove(&self, session_id: &str) -> Result<bool, CheckpointError> {
        match fs::remove_file(self.path_for(session_id)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Session ids with a checkpoint on disk, sorted.
    pub fn list(&self) -> Result<Vec<String>, CheckpointError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(CHECKPOINT_SUFFIX)) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn file_name(session_id: &str) -> String {
    let mut safe: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() {
        safe.push_str("session");
    }
    format!("{safe}{CHECKPOINT_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_become_safe_file_names() {
        assert_eq!(file_name("run-2024_01"), "run-2024_01.checkpoint.ron");
        assert_eq!(file_name("../etc/passwd"), "___etc_passwd.checkpoint.ron");
        assert_eq!(file_name(""), "session.checkpoint.ron");
    }
}
