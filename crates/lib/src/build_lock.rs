//! Machine-wide build lock.
//!
//! A single `flock`-backed lock file inside a fixed directory serialises every
//! extension build on the machine, across processes, variants and versions.
//! The lock is released when the [`BuildLock`] is dropped, which includes
//! unwinding out of a failed build.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const LOCK_FILENAME: &str = ".lock";

/// Who holds the lock, written into the lock file for diagnostics.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
}

#[derive(Debug, Error)]
pub enum BuildLockError {
  #[error("Failed to create lock directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("Failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("Failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("Failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// State of the lock as seen without waiting for it.
#[derive(Debug)]
pub enum LockStatus {
  Free,
  /// Held by another handle. The holder is `None` while its metadata is being written.
  Held(Option<LockMetadata>),
}

pub struct BuildLock {
  // Closing the handle releases the lock.
  _file: File,
  lock_path: PathBuf,
}

impl BuildLock {
  /// Acquire the lock in `lock_dir`, blocking until it is free.
  pub fn acquire(lock_dir: &Path, command: &str) -> Result<Self, BuildLockError> {
    let (file, lock_path) = open_lock_file(lock_dir)?;

    match lock(&file, false) {
      Ok(()) => {}
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
        match read_holder(&lock_path) {
          Some(holder) => info!(
            pid = holder.pid,
            command = %holder.command,
            lock = ?lock_path,
            "waiting for build lock"
          ),
          None => info!(lock = ?lock_path, "waiting for build lock"),
        }
        lock(&file, true).map_err(BuildLockError::LockFailed)?;
      }
      Err(err) => return Err(BuildLockError::LockFailed(err)),
    }

    Self::locked(file, lock_path, command)
  }

  /// Report whether the lock in `lock_dir` is held, and by whom.
  ///
  /// Never blocks and never rewrites the holder's metadata. A missing lock
  /// directory is reported as free without creating it.
  pub fn status(lock_dir: &Path) -> Result<LockStatus, BuildLockError> {
    let lock_path = lock_dir.join(LOCK_FILENAME);
    if !lock_path.exists() {
      return Ok(LockStatus::Free);
    }
    let (file, lock_path) = open_lock_file(lock_dir)?;

    // A successful attempt is released when `file` is closed.
    match lock(&file, false) {
      Ok(()) => Ok(LockStatus::Free),
      Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(LockStatus::Held(read_holder(&lock_path))),
      Err(err) => Err(BuildLockError::LockFailed(err)),
    }
  }

  fn locked(file: File, lock_path: PathBuf, command: &str) -> Result<Self, BuildLockError> {
    write_metadata(&file, command)?;
    debug!(lock = ?lock_path, command, "build lock acquired");
    Ok(Self { _file: file, lock_path })
  }
}

impl Drop for BuildLock {
  fn drop(&mut self) {
    debug!(lock = ?self.lock_path, "build lock released");
  }
}

fn open_lock_file(lock_dir: &Path) -> Result<(File, PathBuf), BuildLockError> {
  std::fs::create_dir_all(lock_dir).map_err(|source| BuildLockError::CreateDir {
    path: lock_dir.to_path_buf(),
    source,
  })?;

  let lock_path = lock_dir.join(LOCK_FILENAME);
  let file = OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(&lock_path)
    .map_err(BuildLockError::OpenFile)?;

  Ok((file, lock_path))
}

fn write_metadata(file: &File, command: &str) -> Result<(), BuildLockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
  };

  let mut file = file;
  file.set_len(0).map_err(BuildLockError::WriteMetadata)?;
  file.seek(SeekFrom::Start(0)).map_err(BuildLockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer(&mut writer, &metadata).map_err(|e| BuildLockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(BuildLockError::WriteMetadata)?;

  Ok(())
}

fn read_holder(lock_path: &Path) -> Option<LockMetadata> {
  let contents = std::fs::read_to_string(lock_path).ok()?;
  serde_json::from_str(&contents).ok()
}

#[cfg(unix)]
fn lock(file: &File, blocking: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = if blocking {
    FlockOperation::LockExclusive
  } else {
    FlockOperation::NonBlockingLockExclusive
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock(file: &File, blocking: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = if blocking {
    LOCKFILE_EXCLUSIVE_LOCK
  } else {
    LOCKFILE_FAIL_IMMEDIATELY | LOCKFILE_EXCLUSIVE_LOCK
  };

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result != 0 {
    return Ok(());
  }
  let err = io::Error::last_os_error();
  if err.raw_os_error() == Some(ERROR_LOCK_VIOLATION as i32) {
    return Err(io::Error::from(io::ErrorKind::WouldBlock));
  }
  Err(err)
}
