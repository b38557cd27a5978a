//! Persisted build record.
//!
//! One record per target lives at `<build_dir>/<target>/.jfb-record.json`. It maps each
//! compile-unit to the fingerprints it was last compiled with, including a snapshot of
//! every header in its include set, plus the inputs of the last successful link.
//!
//! # Format
//!
//! ```json
//! {
//!   "version": 1,
//!   "units": {
//!     "/work/demo/src/main.c": {
//!       "content": "9f2c...",
//!       "flags": "41ab...",
//!       "headers": { "/work/demo/include/util.h": "77e0..." },
//!       "output": "/work/demo/build/debug/demo/obj/src/main.c.o",
//!       "output_hash": "c3d1..."
//!     }
//!   },
//!   "link": null
//! }
//! ```
//!
//! Records are written atomically. A record that cannot be parsed, or has an unknown
//! version, is discarded with a warning and the build proceeds as if from scratch.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::util::fs::write_atomic;
use crate::util::hash::ContentHash;

/// Current record format version.
pub const RECORD_VERSION: u32 = 1;

/// Errors raised while loading or saving a build record.
#[derive(Debug, Error)]
pub enum RecordError {
  #[error("failed to read build record {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("build record {path} is corrupt: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("build record {path} has unsupported version {version}, expected {RECORD_VERSION}")]
  UnsupportedVersion { path: PathBuf, version: u32 },

  #[error("failed to serialize build record: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to write build record {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// What a compile-unit was last built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
  pub content: ContentHash,
  pub flags: ContentHash,
  /// Fingerprint of every header in the unit's include set at compile time.
  pub headers: BTreeMap<PathBuf, ContentHash>,
  pub output: PathBuf,
  pub output_hash: ContentHash,
}

/// What the target artifact was last linked (or archived) from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
  pub flags: ContentHash,
  /// Object file → hash at link time.
  pub inputs: BTreeMap<PathBuf, ContentHash>,
  /// Cache identities of the dependencies linked in, sorted.
  pub dependencies: Vec<String>,
  pub output: PathBuf,
  pub output_hash: ContentHash,
}

/// Build record for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
  pub version: u32,
  #[serde(default)]
  pub units: BTreeMap<PathBuf, UnitRecord>,
  #[serde(default)]
  pub link: Option<LinkRecord>,
}

impl Default for BuildRecord {
  fn default() -> Self {
    Self::new()
  }
}

impl BuildRecord {
  pub fn new() -> Self {
    Self {
      version: RECORD_VERSION,
      units: BTreeMap::new(),
      link: None,
    }
  }

  /// Load a record. A missing file yields an empty record.
  pub fn load(path: &Path) -> Result<Self, RecordError> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new()),
      Err(source) => {
        return Err(RecordError::Read {
          path: path.to_path_buf(),
          source,
        });
      }
    };

    let record: BuildRecord = serde_json::from_str(&content).map_err(|source| RecordError::Corrupt {
      path: path.to_path_buf(),
      source,
    })?;

    if record.version != RECORD_VERSION {
      return Err(RecordError::UnsupportedVersion {
        path: path.to_path_buf(),
        version: record.version,
      });
    }

    debug!(path = %path.display(), units = record.units.len(), "loaded build record");
    Ok(record)
  }

  /// Load a record, treating any unreadable or corrupt record as empty.
  pub fn load_or_recover(path: &Path) -> Self {
    match Self::load(path) {
      Ok(record) => record,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "discarding unusable build record");
        Self::new()
      }
    }
  }

  /// Persist atomically.
  pub fn save(&self, path: &Path) -> Result<(), RecordError> {
    let content = serde_json::to_string_pretty(self).map_err(RecordError::Serialize)?;
    write_atomic(path, content.as_bytes()).map_err(|source| RecordError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), units = self.units.len(), "saved build record");
    Ok(())
  }

  pub fn unit(&self, path: &Path) -> Option<&UnitRecord> {
    self.units.get(path)
  }

  pub fn set_unit(&mut self, path: PathBuf, record: UnitRecord) {
    self.units.insert(path, record);
  }

  /// Drop entries for units that are no longer part of the target.
  pub fn retain_units<F: Fn(&Path) -> bool>(&mut self, keep: F) {
    self.units.retain(|path, _| keep(path));
  }
}
