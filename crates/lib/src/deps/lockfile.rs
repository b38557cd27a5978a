//! Dependency pin file.
//!
//! `jfb.lock` sits next to `jfb.toml` and records the commit each dependency's revision
//! resolved to, so a tag is looked up over the network once and later builds are
//! reproducible.
//!
//! # Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "dependencies": {
//!     "zlib": {
//!       "url": "https://github.com/madler/zlib.git",
//!       "rev": "v1.3.1",
//!       "commit": "51b7f2abdade71cd9bb0e7a373ef2610ec6f9daf",
//!       "lockedAt": 1733667300
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::project::Dependency;
use crate::util::fs::write_atomic;

/// Current lock file format version.
pub const LOCK_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockFile {
  pub version: u32,
  pub dependencies: BTreeMap<String, LockedDependency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockedDependency {
  pub url: String,
  /// Revision as written in `jfb.toml`.
  pub rev: String,
  /// Commit the revision resolved to.
  pub commit: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub locked_at: Option<u64>,
}

#[derive(Debug, Error)]
pub enum LockFileError {
  #[error("failed to read lock file: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write lock file: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse lock file: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize lock file: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported lock file version {0}, expected {LOCK_VERSION}")]
  UnsupportedVersion(u32),
}

impl Default for LockFile {
  fn default() -> Self {
    Self::new()
  }
}

impl LockFile {
  pub fn new() -> Self {
    Self {
      version: LOCK_VERSION,
      dependencies: BTreeMap::new(),
    }
  }

  /// Load a lock file. `Ok(None)` if it does not exist.
  pub fn load(path: &Path) -> Result<Option<Self>, LockFileError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(LockFileError::Read(e)),
    };

    let lock: LockFile = serde_json::from_str(&content).map_err(LockFileError::Parse)?;
    if lock.version != LOCK_VERSION {
      return Err(LockFileError::UnsupportedVersion(lock.version));
    }
    Ok(Some(lock))
  }

  pub fn save(&self, path: &Path) -> Result<(), LockFileError> {
    let mut content = serde_json::to_string_pretty(self).map_err(LockFileError::Serialize)?;
    content.push('\n');
    write_atomic(path, content.as_bytes()).map_err(LockFileError::Write)
  }

  /// The pinned commit for a dependency, if the pin still matches its URL and revision.
  pub fn pinned(&self, dependency: &Dependency) -> Option<&str> {
    self
      .dependencies
      .get(&dependency.name)
      .filter(|locked| locked.url == dependency.url && locked.rev == dependency.rev)
      .map(|locked| locked.commit.as_str())
  }

  pub fn pin(&mut self, dependency: &Dependency, commit: &str) {
    let locked_at = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).ok();
    self.dependencies.insert(
      dependency.name.clone(),
      LockedDependency {
        url: dependency.url.clone(),
        rev: dependency.rev.clone(),
        commit: commit.to_string(),
        locked_at,
      },
    );
  }

  /// Drop pins for dependencies no longer declared.
  pub fn retain_declared(&mut self, dependencies: &[Dependency]) {
    self.dependencies.retain(|name, _| dependencies.iter().any(|d| &d.name == name));
  }
}
