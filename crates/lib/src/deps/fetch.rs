//! Git revision resolution and checkout.
//!
//! This module handles:
//! - Resolving a tag, branch or abbreviated hash to exactly one commit
//! - Maintaining one bare mirror per remote URL under `<cache>/git/`
//! - Checking out a commit into an isolated working directory
//!
//! All git work goes through the `git` executable via [`ProcessRunner`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::cache::DependencyCache;
use super::entry_lock::{EntryLock, LockError};
use crate::process::{Invocation, ProcessOutput, ProcessRunner};
use crate::util::fs::remove_if_exists;

/// Errors that can occur while talking to git.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("tool '{tool}' not found")]
  ToolMissing { tool: String },

  #[error("failed to run '{tool}': {source}")]
  Spawn {
    tool: String,
    #[source]
    source: std::io::Error,
  },

  #[error("git {step} failed for '{url}': {diagnostics}")]
  Git {
    step: &'static str,
    url: String,
    diagnostics: String,
  },

  #[error("revision '{rev}' not found in '{url}'")]
  RevisionNotFound { url: String, rev: String },

  #[error("revision '{rev}' in '{url}' is ambiguous: {}", .candidates.join(", "))]
  AmbiguousRevision {
    url: String,
    rev: String,
    candidates: Vec<String>,
  },

  #[error("failed to prepare {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Lock(#[from] LockError),
}

/// Whether `rev` is already a full SHA-1 or SHA-256 commit id.
pub fn is_full_commit(rev: &str) -> bool {
  matches!(rev.len(), 40 | 64) && rev.chars().all(|c| c.is_ascii_hexdigit())
}

/// Drives the `git` executable.
#[derive(Clone)]
pub struct GitFetcher {
  runner: Arc<dyn ProcessRunner>,
  git: String,
}

impl GitFetcher {
  pub fn new(runner: Arc<dyn ProcessRunner>, git: impl Into<String>) -> Self {
    Self {
      runner,
      git: git.into(),
    }
  }

  /// Resolve `rev` to a single commit.
  ///
  /// Full hashes are returned as-is. Otherwise the remote's refs are listed, preferring
  /// peeled tag targets; more than one distinct match is rejected. Revisions that match
  /// no ref (abbreviated hashes) are looked up in the local mirror.
  pub async fn resolve(&self, cache: &DependencyCache, url: &str, rev: &str) -> Result<String, FetchError> {
    if is_full_commit(rev) {
      return Ok(rev.to_ascii_lowercase());
    }

    let listing = self
      .git(Invocation::new(&self.git).args(["ls-remote", url, rev]), "ls-remote", url)
      .await?;
    let candidates = matching_refs(&listing.stdout, rev);
    match candidates.as_slice() {
      [commit] => {
        debug!(url, rev, commit, "revision resolved from remote refs");
        return Ok(commit.clone());
      }
      [] => {}
      _ => {
        return Err(FetchError::AmbiguousRevision {
          url: url.to_string(),
          rev: rev.to_string(),
          candidates,
        });
      }
    }

    let _lock = self.lock_mirror(cache, url).await?;
    let mirror = self.update_mirror(cache, url).await?;
    let output = self
      .run(
        Invocation::new(&self.git)
          .arg("-C")
          .arg(mirror.display().to_string())
          .args(["rev-parse", "--verify", "--quiet"])
          .arg(format!("{rev}^{{commit}}")),
      )
      .await?;

    if output.success() {
      let commit = output.stdout.trim().to_ascii_lowercase();
      debug!(url, rev, commit, "revision resolved from mirror");
      return Ok(commit);
    }
    if output.diagnostics().contains("ambiguous") {
      return Err(FetchError::AmbiguousRevision {
        url: url.to_string(),
        rev: rev.to_string(),
        candidates: Vec::new(),
      });
    }
    Err(FetchError::RevisionNotFound {
      url: url.to_string(),
      rev: rev.to_string(),
    })
  }

  /// Check out `commit` into a fresh working directory at `dest`.
  pub async fn checkout(&self, cache: &DependencyCache, url: &str, commit: &str, dest: &Path) -> Result<(), FetchError> {
    let _lock = self.lock_mirror(cache, url).await?;
    let mirror = cache.mirror_dir(url);

    if !self.has_commit(&mirror, commit).await? {
      self.update_mirror(cache, url).await?;
      if !self.has_commit(&mirror, commit).await? {
        return Err(FetchError::RevisionNotFound {
          url: url.to_string(),
          rev: commit.to_string(),
        });
      }
    }

    remove_if_exists(dest).map_err(|source| FetchError::Io {
      path: dest.to_path_buf(),
      source,
    })?;
    if let Some(parent) = dest.parent() {
      std::fs::create_dir_all(parent).map_err(|source| FetchError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    info!(url, commit, dest = %dest.display(), "checking out");
    self
      .git(
        Invocation::new(&self.git)
          .args(["clone", "--shared", "--no-checkout"])
          .arg(mirror.display().to_string())
          .arg(dest.display().to_string()),
        "clone",
        url,
      )
      .await?;
    self
      .git(
        Invocation::new(&self.git)
          .arg("-C")
          .arg(dest.display().to_string())
          .args(["checkout", "--detach", "--force", commit]),
        "checkout",
        url,
      )
      .await?;

    if dest.join(".gitmodules").is_file() {
      self
        .git(
          Invocation::new(&self.git)
            .arg("-C")
            .arg(dest.display().to_string())
            .args(["submodule", "update", "--init", "--recursive"]),
          "submodule update",
          url,
        )
        .await?;
    }

    Ok(())
  }

  async fn lock_mirror(&self, cache: &DependencyCache, url: &str) -> Result<EntryLock, FetchError> {
    Ok(EntryLock::acquire(&cache.mirror_lock_path(url), url, "git mirror").await?)
  }

  /// Clone or refresh the bare mirror for `url`. Caller holds the mirror lock.
  async fn update_mirror(&self, cache: &DependencyCache, url: &str) -> Result<PathBuf, FetchError> {
    let mirror = cache.mirror_dir(url);

    if mirror.join("HEAD").is_file() {
      info!(url, "updating mirror");
      self
        .git(
          Invocation::new(&self.git)
            .arg("-C")
            .arg(mirror.display().to_string())
            .args(["remote", "update", "--prune"]),
          "fetch",
          url,
        )
        .await?;
    } else {
      info!(url, mirror = %mirror.display(), "cloning mirror");
      remove_if_exists(&mirror).map_err(|source| FetchError::Io {
        path: mirror.clone(),
        source,
      })?;
      if let Some(parent) = mirror.parent() {
        std::fs::create_dir_all(parent).map_err(|source| FetchError::Io {
          path: parent.to_path_buf(),
          source,
        })?;
      }
      self
        .git(
          Invocation::new(&self.git)
            .args(["clone", "--mirror", url])
            .arg(mirror.display().to_string()),
          "clone",
          url,
        )
        .await?;
    }

    Ok(mirror)
  }

  async fn has_commit(&self, mirror: &Path, commit: &str) -> Result<bool, FetchError> {
    if !mirror.join("HEAD").is_file() {
      return Ok(false);
    }
    let output = self
      .run(
        Invocation::new(&self.git)
          .arg("-C")
          .arg(mirror.display().to_string())
          .args(["cat-file", "-e"])
          .arg(format!("{commit}^{{commit}}")),
      )
      .await?;
    Ok(output.success())
  }

  /// Run git and require exit 0.
  async fn git(&self, invocation: Invocation, step: &'static str, url: &str) -> Result<ProcessOutput, FetchError> {
    let output = self.run(invocation).await?;
    if output.success() {
      Ok(output)
    } else {
      Err(FetchError::Git {
        step,
        url: url.to_string(),
        diagnostics: output.diagnostics(),
      })
    }
  }

  async fn run(&self, invocation: Invocation) -> Result<ProcessOutput, FetchError> {
    let invocation = invocation.env("GIT_TERMINAL_PROMPT", "0");
    self.runner.run(&invocation).await.map_err(|source| {
      if source.kind() == std::io::ErrorKind::NotFound {
        FetchError::ToolMissing {
          tool: invocation.program.clone(),
        }
      } else {
        FetchError::Spawn {
          tool: invocation.program.clone(),
          source,
        }
      }
    })
  }
}

/// Distinct commits among `ls-remote` lines whose ref names `rev`.
///
/// An annotated tag is listed twice (`refs/tags/v1` and `refs/tags/v1^{}`); the peeled
/// line wins so the result is the tagged commit rather than the tag object.
fn matching_refs(listing: &str, rev: &str) -> Vec<String> {
  let mut by_ref: Vec<(String, String, bool)> = Vec::new();

  for line in listing.lines() {
    let Some((sha, name)) = line.split_once(char::is_whitespace) else {
      continue;
    };
    let name = name.trim();
    let (base, peeled) = match name.strip_suffix("^{}") {
      Some(base) => (base, true),
      None => (name, false),
    };
    let named = base == rev || base.ends_with(&format!("/{rev}"));
    if !named {
      continue;
    }

    let sha = sha.trim().to_ascii_lowercase();
    match by_ref.iter_mut().find(|(r, _, _)| r == base) {
      Some(existing) if peeled => {
        existing.1 = sha;
        existing.2 = true;
      }
      Some(_) => {}
      None => by_ref.push((base.to_string(), sha, peeled)),
    }
  }

  let mut commits: Vec<String> = by_ref.into_iter().map(|(_, sha, _)| sha).collect();
  commits.sort();
  commits.dedup();
  commits
}
