#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

//! Per-record advisory locks. The coordination service and worker
//! supervisor are distinct OS processes, so mutual exclusion must hold
//! across processes, not merely within one. `flock`-style locks are
//! released by the OS when the holder dies, which is the stale-lock
//! story: the next acquirer succeeds without any cleanup protocol.

use crate::error::{ForemanError, Result};
use crate::store::paths::Layout;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCK_RETRIES: u32 = 3;
const LOCK_BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Exclusive advisory lock over one record file. Released on drop.
#[derive(Debug)]
pub struct RecordLock {
    file: File,
    path: PathBuf,
}

impl RecordLock {
    /// Acquire the lock for `record_path`, retrying with doubling
    /// backoff (100 ms base, 3 retries) before giving up with
    /// `LockBusy`.
    pub fn acquire(record_path: &Path) -> Result<Self> {
        let lock_path = Layout::lock_path(record_path);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut backoff = LOCK_BASE_BACKOFF;
        for attempt in 0..=LOCK_RETRIES {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: lock_path,
                    })
                }
                Err(_) if attempt < LOCK_RETRIES => {
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(err) => {
                    return Err(ForemanError::LockBusy(format!(
                        "{} ({err})",
                        lock_path.display()
                    )))
                }
            }
        }

        Err(ForemanError::LockBusy(lock_path.display().to_string()))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
