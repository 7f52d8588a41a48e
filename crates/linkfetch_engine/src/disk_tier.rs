use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use linkfetch_core::Payload;
use linkfetch_logging::fetch_debug;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::cache::{CacheEntry, CachedValue, Tier};
use crate::target::key_digest;
use crate::CacheError;

const ENTRY_VERSION: u32 = 1;
const ENTRY_EXTENSION: &str = "entry";

/// First line of every entry file; the payload bytes follow the newline.
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    version: u32,
    key: String,
    created_at_ms: i64,
    ttl_ms: u64,
    empty: bool,
    fetched_bytes: u64,
    data_len: u64,
}

impl EntryHeader {
    fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.created_at_ms)
            .single()
            .unwrap_or_default()
    }

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let age_ms = now.timestamp_millis().saturating_sub(self.created_at_ms);
        age_ms < 0 || age_ms as u64 >= self.ttl_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskUsage {
    pub entries: usize,
    pub bytes: u64,
}

/// Persistent tier: one file per key under `{dir}/{digest[0..2]}/{digest}.entry`.
///
/// Entries are written to a temp file and renamed into place, so readers see
/// either the previous or the new entry and concurrent writers resolve
/// last-writer-wins.
#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
    ttl: Duration,
}

impl DiskTier {
    pub fn open(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, ttl })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        let digest = key_digest(key);
        self.dir
            .join(&digest[..2])
            .join(format!("{digest}.{ENTRY_EXTENSION}"))
    }

    /// Reads a live entry. Expired entries are removed and reported as absent;
    /// unreadable ones are removed and reported as errors.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let (header, data) = match parse_entry(&path, &raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                let _ = fs::remove_file(&path);
                return Err(err);
            }
        };
        if header.key != key {
            let _ = fs::remove_file(&path);
            return Err(CacheError::Corrupt {
                path,
                reason: "key mismatch".into(),
            });
        }
        if header.is_expired_at(Utc::now()) {
            fetch_debug!("Disk entry expired for {}", key);
            let _ = fs::remove_file(&path);
            return Ok(None);
        }

        let payload = if header.empty {
            Payload::Empty
        } else {
            Payload::Data(data.to_vec())
        };
        Ok(Some(CacheEntry {
            key: key.to_string(),
            value: CachedValue {
                payload,
                fetched_bytes: header.fetched_bytes,
            },
            tier: Tier::Disk,
            created_at: header.created_at(),
            ttl: Duration::from_millis(header.ttl_ms),
        }))
    }

    pub fn put(&self, key: &str, value: &CachedValue) -> Result<(), CacheError> {
        self.put_with_ttl(key, value, Utc::now(), self.ttl)
    }

    pub fn put_with_ttl(
        &self,
        key: &str,
        value: &CachedValue,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        let parent = path.parent().unwrap_or(&self.dir);
        fs::create_dir_all(parent)?;

        let data = value.payload.data().unwrap_or_default();
        let header = EntryHeader {
            version: ENTRY_VERSION,
            key: key.to_string(),
            created_at_ms: created_at.timestamp_millis(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            empty: matches!(value.payload, Payload::Empty),
            fetched_bytes: value.fetched_bytes,
            data_len: data.len() as u64,
        };

        let mut tmp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer(&mut tmp, &header)?;
        tmp.write_all(b"\n")?;
        tmp.write_all(data)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|err| CacheError::Io(err.error))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes expired and unreadable entries. Returns how many files were removed.
    pub fn sweep_expired(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        self.remove_where(|header| header.is_expired_at(now))
    }

    /// Removes entries created more than `age` ago, regardless of their TTL.
    pub fn clear_older_than(&self, age: Duration) -> Result<usize, CacheError> {
        let cutoff = Utc::now().timestamp_millis()
            - i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
        self.remove_where(|header| header.created_at_ms < cutoff)
    }

    pub fn clear(&self) -> Result<usize, CacheError> {
        self.remove_where(|_| true)
    }

    pub fn usage(&self) -> DiskUsage {
        let mut usage = DiskUsage::default();
        for path in self.entry_files().unwrap_or_default() {
            if let Ok(meta) = fs::metadata(&path) {
                usage.entries += 1;
                usage.bytes += meta.len();
            }
        }
        usage
    }

    fn remove_where(&self, predicate: impl Fn(&EntryHeader) -> bool) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.entry_files()? {
            let doomed = match read_header(&path) {
                Ok(header) => predicate(&header),
                Err(_) => true,
            };
            if doomed && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut files = Vec::new();
        for shard in fs::read_dir(&self.dir)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let path = entry?.path();
                if path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION) {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

fn parse_entry<'a>(path: &Path, raw: &'a [u8]) -> Result<(EntryHeader, &'a [u8]), CacheError> {
    let corrupt = |reason: &str| CacheError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let split = raw
        .iter()
        .position(|byte| *byte == b'\n')
        .ok_or_else(|| corrupt("missing header"))?;
    let header: EntryHeader =
        serde_json::from_slice(&raw[..split]).map_err(|err| corrupt(&err.to_string()))?;
    if header.version != ENTRY_VERSION {
        return Err(corrupt("unsupported entry version"));
    }
    let data = &raw[split + 1..];
    if data.len() as u64 != header.data_len {
        return Err(corrupt("truncated payload"));
    }
    Ok((header, data))
}

fn read_header(path: &Path) -> Result<EntryHeader, CacheError> {
    let mut line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut line)?;
    let header: EntryHeader = serde_json::from_str(line.trim_end()).map_err(|err| {
        CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    })?;
    Ok(header)
}
