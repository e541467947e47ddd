//! File-backed lease store shared by processes on one host.
//!
//! Each identity maps to `<dir>/<identity>.lease.json`. Every write goes to a
//! temp file first. A missing lease is published with a hard link, which fails
//! if another process got there first; takeover of an expired lease and
//! renewal publish through a rename. A lease file that cannot be parsed is
//! treated as held until its mtime is older than the requested TTL, and then
//! as expired. Expired takeover is best-effort across processes: two processes
//! racing on the same expired lease may both observe it as expired.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

use crate::core::{DispatchError, LeaseRecord, LeaseStore};
use crate::util::clock::{expiry_after, now_ms};

/// Lease records persisted as JSON files.
pub struct FileLeaseStore {
    dir: PathBuf,
    guard: Mutex<()>,
}

/// What a lease path currently holds.
enum LeaseFile {
    Missing,
    Held(LeaseRecord),
    /// Unparseable contents, with the file's age.
    Unreadable { age: Duration },
}

fn lease_err(e: impl std::fmt::Display) -> DispatchError {
    DispatchError::Lease(e.to_string())
}

impl FileLeaseStore {
    /// Open (and create) the lease directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(lease_err)?;
        Ok(Self {
            dir,
            guard: Mutex::new(()),
        })
    }

    fn file_path(&self, identity: &str) -> PathBuf {
        let safe: String = identity
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.lease.json"))
    }

    fn read(path: &Path) -> Result<LeaseFile, DispatchError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LeaseFile::Missing),
            Err(e) => return Err(lease_err(e)),
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(LeaseFile::Held(record)),
            Err(parse) => {
                let modified = fs::metadata(path)
                    .and_then(|meta| meta.modified())
                    .map_err(lease_err)?;
                let age = SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or(Duration::ZERO);
                tracing::warn!(path = %path.display(), error = %parse, "unreadable lease file");
                Ok(LeaseFile::Unreadable { age })
            }
        }
    }

    fn write_temp(path: &Path, record: &LeaseRecord) -> Result<PathBuf, DispatchError> {
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec(record).map_err(lease_err)?;
        fs::write(&tmp, bytes).map_err(lease_err)?;
        Ok(tmp)
    }

    fn replace(path: &Path, record: &LeaseRecord) -> Result<(), DispatchError> {
        let tmp = Self::write_temp(path, record)?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            lease_err(e)
        })
    }

    /// Publish `record` only if `path` does not exist yet.
    fn create_exclusive(path: &Path, record: &LeaseRecord) -> Result<bool, DispatchError> {
        let tmp = Self::write_temp(path, record)?;
        let linked = fs::hard_link(&tmp, path);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(lease_err(e)),
        }
    }
}

impl LeaseStore for FileLeaseStore {
    fn try_acquire(
        &self,
        identity: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DispatchError> {
        let _guard = self.guard.lock();
        let path = self.file_path(identity);
        let now = now_ms();
        let record = LeaseRecord::new(holder, ttl, now);

        match Self::read(&path)? {
            // Returns false when another process created it first.
            LeaseFile::Missing => Self::create_exclusive(&path, &record),
            LeaseFile::Held(existing)
                if existing.holder != holder && !existing.is_expired_at(now) =>
            {
                Ok(false)
            }
            LeaseFile::Unreadable { age } if age < ttl => Ok(false),
            LeaseFile::Held(_) | LeaseFile::Unreadable { .. } => {
                Self::replace(&path, &record)?;
                Ok(true)
            }
        }
    }

    fn renew(&self, identity: &str, holder: &str, ttl: Duration) -> Result<bool, DispatchError> {
        let _guard = self.guard.lock();
        let path = self.file_path(identity);
        let now = now_ms();
        match Self::read(&path)? {
            LeaseFile::Held(mut rec) if rec.holder == holder && !rec.is_expired_at(now) => {
                rec.expires_at_ms = expiry_after(ttl);
                Self::replace(&path, &rec)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn release(&self, identity: &str, holder: &str) -> Result<(), DispatchError> {
        let _guard = self.guard.lock();
        let path = self.file_path(identity);
        if matches!(Self::read(&path)?, LeaseFile::Held(rec) if rec.holder == holder) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(lease_err(e)),
            }
        }
        Ok(())
    }

    fn current(&self, identity: &str) -> Result<Option<LeaseRecord>, DispatchError> {
        match Self::read(&self.file_path(identity))? {
            LeaseFile::Held(rec) => Ok(Some(rec)),
            LeaseFile::Missing | LeaseFile::Unreadable { .. } => Ok(None),
        }
    }
}
