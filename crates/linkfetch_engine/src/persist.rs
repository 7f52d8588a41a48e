use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("cannot use {path:?} as a directory: {reason}")]
    Dir { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Creates `dir` and its parents when missing; fails if something else sits at that path.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    let dir_error = |reason: String| PersistError::Dir {
        path: dir.to_path_buf(),
        reason,
    };
    fs::create_dir_all(dir).map_err(|err| dir_error(err.to_string()))?;
    if !dir.is_dir() {
        return Err(dir_error("not a directory".into()));
    }
    Ok(())
}

/// Replaces `{dir}/{filename}` in one rename, so readers never observe a half
/// written file. Concurrent writers of the same name resolve last-writer-wins.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_dir(&self.dir)?;

        let mut staged = tempfile::Builder::new()
            .prefix(".linkfetch-")
            .suffix(".part")
            .tempfile_in(&self.dir)?;
        staged.write_all(content)?;
        staged.as_file().sync_all()?;

        let target = self.dir.join(filename);
        staged
            .persist(&target)
            .map_err(|err| PersistError::Io(err.error))?;
        Ok(target)
    }
}
