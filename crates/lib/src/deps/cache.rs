//! Machine-global dependency cache.
//!
//! # Layout
//!
//! ```text
//! <cache>/
//!   entries/<identity>/
//!     entry.json        status, manifest and identity inputs
//!     src/              git worktree (removed after a successful build)
//!     build/            CMake binary dir (removed after a successful build)
//!     out/              install prefix; headers and libraries live here
//!   locks/<identity>.lock
//!   git/<hash(url)>/    shared bare mirrors
//! ```
//!
//! Reading a built entry takes no lock. Building or rewriting an entry requires an
//! [`EntryGuard`], which serializes builders of one identity inside this process (async
//! mutex) and across processes (advisory file lock). A built entry is never rewritten.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use super::entry_lock::{EntryLock, LockError};
use super::identity::{CacheIdentity, IdentityInputs};
use crate::consts::ENTRY_DESCRIPTOR;
use crate::platform::paths::dep_cache_dir;
use crate::util::fs::write_atomic;
use crate::util::hash::hash_strings;

/// Current entry descriptor version.
pub const ENTRY_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to read cache entry {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("cache entry {path} is corrupt: {source}")]
  Corrupt {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write cache entry {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize cache entry: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error(transparent)]
  Lock(#[from] LockError),

  #[error("cache entry {0} is already built and cannot be modified")]
  Immutable(CacheIdentity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
  Pending,
  Built,
  Failed,
}

/// Headers and libraries a built dependency exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
  pub include_dirs: Vec<PathBuf>,
  pub libraries: Vec<PathBuf>,
}

/// Contents of `entry.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDescriptor {
  pub version: u32,
  pub identity: CacheIdentity,
  /// Name of the dependency in the project that first built the entry.
  pub name: String,
  pub inputs: IdentityInputs,
  pub status: EntryStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub manifest: Option<ArtifactManifest>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub updated_at_unix: u64,
}

impl EntryDescriptor {
  pub fn new(identity: CacheIdentity, name: &str, inputs: IdentityInputs, status: EntryStatus) -> Self {
    Self {
      version: ENTRY_VERSION,
      identity,
      name: name.to_string(),
      inputs,
      status,
      manifest: None,
      error: None,
      updated_at_unix: unix_now(),
    }
  }

  pub fn built(mut self, manifest: ArtifactManifest) -> Self {
    self.status = EntryStatus::Built;
    self.manifest = Some(manifest);
    self.error = None;
    self.updated_at_unix = unix_now();
    self
  }

  pub fn failed(mut self, error: &str) -> Self {
    self.status = EntryStatus::Failed;
    self.manifest = None;
    self.error = Some(error.to_string());
    self.updated_at_unix = unix_now();
    self
  }

  /// The manifest, if this entry is usable.
  pub fn built_manifest(&self) -> Option<&ArtifactManifest> {
    match self.status {
      EntryStatus::Built => self.manifest.as_ref(),
      _ => None,
    }
  }
}

fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

/// What a resolver should do with an identity right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
  /// A built entry exists.
  Cached(ArtifactManifest),
  /// Absent or failed; the caller should build it.
  NeedsFetch,
  /// Another task or process is building it; the caller should wait.
  InProgress,
}

/// Exclusive right to build or rewrite one entry.
#[derive(Debug)]
pub struct EntryGuard {
  identity: CacheIdentity,
  _file_lock: EntryLock,
  _local: OwnedMutexGuard<()>,
}

impl EntryGuard {
  pub fn identity(&self) -> &CacheIdentity {
    &self.identity
  }
}

/// Handle to the dependency cache. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct DependencyCache {
  root: PathBuf,
  inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DependencyCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      inflight: Mutex::new(HashMap::new()),
    }
  }

  /// The cache at `JFB_CACHE_DIR` or the platform cache directory.
  pub fn open_default() -> Self {
    Self::new(dep_cache_dir())
  }

  pub fn entry_dir(&self, identity: &CacheIdentity) -> PathBuf {
    self.root.join("entries").join(identity.as_str())
  }

  pub fn descriptor_path(&self, identity: &CacheIdentity) -> PathBuf {
    self.entry_dir(identity).join(ENTRY_DESCRIPTOR)
  }

  pub fn src_dir(&self, identity: &CacheIdentity) -> PathBuf {
    self.entry_dir(identity).join("src")
  }

  pub fn build_dir(&self, identity: &CacheIdentity) -> PathBuf {
    self.entry_dir(identity).join("build")
  }

  pub fn out_dir(&self, identity: &CacheIdentity) -> PathBuf {
    self.entry_dir(identity).join("out")
  }

  pub fn lock_path(&self, identity: &CacheIdentity) -> PathBuf {
    self.root.join("locks").join(format!("{}.lock", identity.as_str()))
  }

  /// Bare mirror shared by every entry cloned from `url`.
  pub fn mirror_dir(&self, url: &str) -> PathBuf {
    self.root.join("git").join(mirror_name(url))
  }

  pub fn mirror_lock_path(&self, url: &str) -> PathBuf {
    self.root.join("locks").join(format!("git-{}.lock", mirror_name(url)))
  }

  /// Read an entry descriptor without locking. `Ok(None)` if absent.
  pub fn lookup(&self, identity: &CacheIdentity) -> Result<Option<EntryDescriptor>, CacheError> {
    let path = self.descriptor_path(identity);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => return Err(CacheError::Read { path, source }),
    };
    serde_json::from_str(&content)
      .map(Some)
      .map_err(|source| CacheError::Corrupt { path, source })
  }

  /// Manifest of a built entry, treating unreadable descriptors as absent.
  pub fn built_manifest(&self, identity: &CacheIdentity) -> Option<ArtifactManifest> {
    match self.lookup(identity) {
      Ok(Some(descriptor)) => descriptor.built_manifest().cloned(),
      Ok(None) => None,
      Err(e) => {
        warn!(identity = %identity, error = %e, "ignoring unreadable cache entry");
        None
      }
    }
  }

  /// Classify an identity without waiting.
  pub fn state(&self, identity: &CacheIdentity) -> Result<EntryState, CacheError> {
    if let Some(manifest) = self.built_manifest(identity) {
      return Ok(EntryState::Cached(manifest));
    }

    let local = self.local_mutex(identity);
    if local.try_lock().is_err() {
      return Ok(EntryState::InProgress);
    }

    if EntryLock::is_free(&self.lock_path(identity))? {
      Ok(EntryState::NeedsFetch)
    } else {
      Ok(EntryState::InProgress)
    }
  }

  /// Take the exclusive build right for an identity, waiting for any current holder.
  pub async fn acquire(&self, identity: &CacheIdentity, command: &str) -> Result<EntryGuard, CacheError> {
    let local = self.local_mutex(identity).lock_owned().await;
    let file_lock = EntryLock::acquire(&self.lock_path(identity), identity.as_str(), command).await?;
    debug!(identity = %identity, "cache entry locked");
    Ok(EntryGuard {
      identity: identity.clone(),
      _file_lock: file_lock,
      _local: local,
    })
  }

  /// Atomically write an entry descriptor. Refuses to replace a built entry.
  pub fn write_descriptor(&self, guard: &EntryGuard, descriptor: &EntryDescriptor) -> Result<(), CacheError> {
    let identity = guard.identity();
    if let Ok(Some(existing)) = self.lookup(identity)
      && existing.status == EntryStatus::Built
    {
      return Err(CacheError::Immutable(identity.clone()));
    }

    let path = self.descriptor_path(identity);
    let content = serde_json::to_string_pretty(descriptor).map_err(CacheError::Serialize)?;
    write_atomic(&path, content.as_bytes()).map_err(|source| CacheError::Write { path, source })?;
    debug!(identity = %identity, status = ?descriptor.status, "cache entry descriptor written");
    Ok(())
  }

  fn local_mutex(&self, identity: &CacheIdentity) -> Arc<tokio::sync::Mutex<()>> {
    let mut inflight = self.inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    inflight
      .entry(identity.as_str().to_string())
      .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
      .clone()
  }
}

/// Directory name for a mirror: readable repository name plus a URL hash.
fn mirror_name(url: &str) -> String {
  let url = url.trim().trim_end_matches('/');
  let stem = url
    .rsplit(['/', ':'])
    .next()
    .unwrap_or("repo")
    .trim_end_matches(".git");
  let stem: String = stem
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
    .collect();
  let digest = hash_strings([url]);
  format!("{}-{}", stem, &digest.0[..16])
}
