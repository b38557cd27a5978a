//! Advisory per-identity file locks for the dependency cache.
//!
//! A cache entry is built by at most one process at a time. The builder holds an
//! exclusive `flock` (unix) or `LockFileEx` (windows) lock on
//! `<cache>/locks/<identity>.lock` and writes its pid and command into the file so a
//! waiting process can say who it is waiting for. The lock is released when the
//! [`EntryLock`] is dropped, including when the holder crashes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  /// What the lock protects, e.g. a cache identity or a mirror name.
  pub subject: String,
}

#[derive(Debug, Error)]
pub enum LockError {
  #[error("failed to create lock directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to open lock file {path}: {source}")]
  OpenFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock {path}: {source}")]
  LockFailed {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("lock wait was interrupted: {0}")]
  Interrupted(String),
}

/// An exclusive lock on one lock file, released on drop.
#[derive(Debug)]
pub struct EntryLock {
  file: File,
}

impl EntryLock {
  /// Try to take the lock without waiting. `Ok(None)` means another holder has it.
  pub fn try_acquire(path: &Path, subject: &str, command: &str) -> Result<Option<Self>, LockError> {
    let file = open_lock_file(path)?;

    match lock(&file, false) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
      Err(source) => {
        return Err(LockError::LockFailed {
          path: path.to_path_buf(),
          source,
        });
      }
    }

    let lock = Self { file };
    lock.write_metadata(subject, command)?;
    Ok(Some(lock))
  }

  /// Take the lock, waiting on a blocking thread while another holder has it.
  pub async fn acquire(path: &Path, subject: &str, command: &str) -> Result<Self, LockError> {
    if let Some(lock) = Self::try_acquire(path, subject, command)? {
      return Ok(lock);
    }

    match Self::read_holder(path) {
      Some(holder) => info!(
        subject,
        pid = holder.pid,
        command = %holder.command,
        "waiting for another process to release the lock"
      ),
      None => info!(subject, "waiting for another process to release the lock"),
    }

    let lock_path = path.to_path_buf();
    let file = tokio::task::spawn_blocking(move || -> Result<File, LockError> {
      let file = open_lock_file(&lock_path)?;
      lock(&file, true).map_err(|source| LockError::LockFailed {
        path: lock_path.clone(),
        source,
      })?;
      Ok(file)
    })
    .await
    .map_err(|e| LockError::Interrupted(e.to_string()))??;

    let lock = Self { file };
    lock.write_metadata(subject, command)?;
    debug!(subject, "lock acquired after waiting");
    Ok(lock)
  }

  /// Metadata of whoever currently holds (or last held) the lock at `path`.
  pub fn read_holder(path: &Path) -> Option<LockMetadata> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
  }

  /// Whether nobody holds the lock at `path`. Takes the lock only for the check and
  /// leaves the holder metadata untouched.
  pub fn is_free(path: &Path) -> Result<bool, LockError> {
    let file = open_lock_file(path)?;
    match lock(&file, false) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
      Err(source) => Err(LockError::LockFailed {
        path: path.to_path_buf(),
        source,
      }),
    }
  }

  /// Reads the lock metadata from the held file handle.
  #[cfg(test)]
  pub(crate) fn read_metadata(&self) -> io::Result<LockMetadata> {
    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  fn write_metadata(&self, subject: &str, command: &str) -> Result<(), LockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
      subject: subject.to_string(),
    };

    self.file.set_len(0).map_err(LockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(&self.file);
    writer.seek(SeekFrom::Start(0)).map_err(LockError::WriteMetadata)?;
    serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| LockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(LockError::WriteMetadata)?;
    Ok(())
  }
}

fn open_lock_file(path: &Path) -> Result<File, LockError> {
  if let Some(parent) = path.parent()
    && !parent.exists()
  {
    std::fs::create_dir_all(parent).map_err(|source| LockError::CreateDir {
      path: parent.to_path_buf(),
      source,
    })?;
  }

  OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(path)
    .map_err(|source| LockError::OpenFile {
      path: path.to_path_buf(),
      source,
    })
}

#[cfg(unix)]
fn lock(file: &File, wait: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = if wait {
    FlockOperation::LockExclusive
  } else {
    FlockOperation::NonBlockingLockExclusive
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock(file: &File, wait: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let flags = if wait {
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
    Err(io::Error::from(io::ErrorKind::WouldBlock))
  } else {
    Err(err)
  }
}
