//! Filesystem helpers.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Sibling path with `.tmp` appended to the file name.
///
/// Used as the write target for anything that must appear atomically.
pub fn temp_sibling(path: &Path) -> PathBuf {
  let mut name = path.file_name().map(OsString::from).unwrap_or_default();
  name.push(".tmp");
  path.with_file_name(name)
}

/// Write `contents` to `path` atomically (write to temp, then rename).
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }

  let temp_path = temp_sibling(path);
  fs::write(&temp_path, contents)?;
  fs::rename(&temp_path, path)
}

/// Remove a file or directory tree, ignoring "not found".
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
  let result = if path.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  };

  match result {
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    other => other,
  }
}
