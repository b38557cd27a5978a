//! Dependency resolution.
//!
//! For each declared dependency the resolver pins a commit, derives the cache identity and
//! either reuses a built entry or fetches and builds it. Building one identity is
//! exclusive: concurrent requests (tasks in this process or other processes) wait for the
//! builder and then reuse its entry.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::cache::{ArtifactManifest, CacheError, DependencyCache, EntryDescriptor, EntryState, EntryStatus};
use super::fetch::{FetchError, GitFetcher};
use super::foreign::{CmakeBuilder, ForeignBuild, ForeignBuildError};
use super::identity::{CacheIdentity, IdentityInputs};
use super::lockfile::LockFile;
use crate::process::ProcessRunner;
use crate::project::{Dependency, ForeignTools};
use crate::util::fs::remove_if_exists;
use crate::util::hash::HashError;

#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("failed to fetch dependency '{dependency}': {source}")]
  Fetch {
    dependency: String,
    #[source]
    source: FetchError,
  },

  #[error("failed to build dependency '{dependency}': {source}")]
  Build {
    dependency: String,
    #[source]
    source: ForeignBuildError,
  },

  #[error("failed to compute cache identity for '{dependency}': {source}")]
  Identity {
    dependency: String,
    #[source]
    source: HashError,
  },

  #[error("failed to prepare cache entry {identity}: {source}")]
  Workspace {
    identity: CacheIdentity,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error("dependency task failed: {0}")]
  Task(String),

  #[error("{} dependencies failed: {}", .0.len(), describe_all(.0))]
  Multiple(Vec<ResolveError>),
}

fn describe_all(errors: &[ResolveError]) -> String {
  errors
    .iter()
    .map(|e| e.dependency().unwrap_or("?").to_string())
    .collect::<Vec<_>>()
    .join(", ")
}

impl ResolveError {
  /// Name of the dependency this error belongs to, if any.
  pub fn dependency(&self) -> Option<&str> {
    match self {
      ResolveError::Fetch { dependency, .. }
      | ResolveError::Build { dependency, .. }
      | ResolveError::Identity { dependency, .. } => Some(dependency),
      _ => None,
    }
  }

  /// Every individual failure, flattening [`ResolveError::Multiple`].
  pub fn failures(&self) -> Vec<&ResolveError> {
    match self {
      ResolveError::Multiple(errors) => errors.iter().flat_map(ResolveError::failures).collect(),
      other => vec![other],
    }
  }

  /// Whether any failure is a missing `git` or `cmake` executable.
  pub fn is_tool_missing(&self) -> bool {
    self.failures().into_iter().any(|e| {
      matches!(
        e,
        ResolveError::Fetch {
          source: FetchError::ToolMissing { .. },
          ..
        } | ResolveError::Build {
          source: ForeignBuildError::ToolMissing { .. },
          ..
        }
      )
    })
  }
}

/// How a dependency's entry was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySource {
  /// A built entry already existed.
  Cached,
  /// This invocation fetched and built it.
  Built,
}

/// A dependency ready to be spliced into a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
  pub name: String,
  pub commit: String,
  pub identity: CacheIdentity,
  pub manifest: ArtifactManifest,
  pub source: EntrySource,
}

/// Resolves dependencies against one [`DependencyCache`].
pub struct DependencyResolver {
  cache: Arc<DependencyCache>,
  fetcher: GitFetcher,
  builder: CmakeBuilder,
  /// Profile configure flags, part of every identity.
  profile_flags: Vec<String>,
  /// Recorded in lock metadata so waiters can tell who holds an entry.
  command: String,
}

impl DependencyResolver {
  pub fn new(
    runner: Arc<dyn ProcessRunner>,
    cache: Arc<DependencyCache>,
    tools: &ForeignTools,
    profile_flags: Vec<String>,
    jobs: usize,
  ) -> Self {
    Self {
      cache,
      fetcher: GitFetcher::new(runner.clone(), &tools.git),
      builder: CmakeBuilder::new(runner, &tools.cmake, jobs),
      profile_flags,
      command: std::env::args().collect::<Vec<_>>().join(" "),
    }
  }

  pub fn cache(&self) -> &DependencyCache {
    &self.cache
  }

  /// Resolve a dependency's revision to a commit, skipping the network for pinned deps.
  pub async fn commit_for(&self, dependency: &Dependency, pinned: Option<&str>) -> Result<String, ResolveError> {
    if let Some(commit) = pinned {
      debug!(dependency = %dependency.name, commit, "using pinned commit");
      return Ok(commit.to_string());
    }

    self
      .fetcher
      .resolve(&self.cache, &dependency.url, &dependency.rev)
      .await
      .map_err(|source| ResolveError::Fetch {
        dependency: dependency.name.clone(),
        source,
      })
  }

  /// Produce a built cache entry for `dependency` at `commit`.
  pub async fn resolve(&self, dependency: &Dependency, commit: &str) -> Result<ResolvedDependency, ResolveError> {
    let inputs = IdentityInputs::new(dependency, commit, &self.profile_flags);
    let identity = inputs.identity().map_err(|source| ResolveError::Identity {
      dependency: dependency.name.clone(),
      source,
    })?;

    let resolved = |manifest: ArtifactManifest, source: EntrySource| ResolvedDependency {
      name: dependency.name.clone(),
      commit: commit.to_string(),
      identity: identity.clone(),
      manifest,
      source,
    };

    match self.cache.state(&identity)? {
      EntryState::Cached(manifest) => {
        debug!(dependency = %dependency.name, identity = %identity, "dependency cached");
        return Ok(resolved(manifest, EntrySource::Cached));
      }
      EntryState::InProgress => {
        info!(dependency = %dependency.name, identity = %identity, "waiting for in-progress build");
      }
      EntryState::NeedsFetch => {}
    }

    let guard = self.cache.acquire(&identity, &self.command).await?;

    // Whoever held the lock may have finished the entry.
    if let Some(manifest) = self.cache.built_manifest(&identity) {
      debug!(dependency = %dependency.name, identity = %identity, "dependency built by another holder");
      return Ok(resolved(manifest, EntrySource::Cached));
    }

    let pending = EntryDescriptor::new(identity.clone(), &dependency.name, inputs, EntryStatus::Pending);
    self.cache.write_descriptor(&guard, &pending)?;

    match self.fetch_and_build(dependency, commit, &identity).await {
      Ok(manifest) => {
        self
          .cache
          .write_descriptor(&guard, &pending.built(manifest.clone()))?;
        for dir in [self.cache.src_dir(&identity), self.cache.build_dir(&identity)] {
          if let Err(e) = remove_if_exists(&dir) {
            warn!(path = %dir.display(), error = %e, "failed to remove build scratch");
          }
        }
        info!(dependency = %dependency.name, identity = %identity, "dependency built");
        Ok(resolved(manifest, EntrySource::Built))
      }
      Err(err) => {
        error!(dependency = %dependency.name, identity = %identity, error = %err, "dependency failed");
        if let Err(e) = self.cache.write_descriptor(&guard, &pending.failed(&err.to_string())) {
          warn!(identity = %identity, error = %e, "failed to mark cache entry as failed");
        }
        Err(err)
      }
    }
  }

  async fn fetch_and_build(
    &self,
    dependency: &Dependency,
    commit: &str,
    identity: &CacheIdentity,
  ) -> Result<ArtifactManifest, ResolveError> {
    let src = self.cache.src_dir(identity);
    let build = self.cache.build_dir(identity);
    let out = self.cache.out_dir(identity);

    // A failed attempt may have left partial output behind.
    for dir in [&build, &out] {
      remove_if_exists(dir).map_err(|source| ResolveError::Workspace {
        identity: identity.clone(),
        source,
      })?;
    }

    self
      .fetcher
      .checkout(&self.cache, &dependency.url, commit, &src)
      .await
      .map_err(|source| ResolveError::Fetch {
        dependency: dependency.name.clone(),
        source,
      })?;

    let cmake_flags: Vec<String> = self
      .profile_flags
      .iter()
      .chain(&dependency.cmake_flags)
      .cloned()
      .collect();

    self
      .builder
      .build(&ForeignBuild {
        dependency: &dependency.name,
        source_dir: &src,
        build_dir: &build,
        install_dir: &out,
        cmake_flags: &cmake_flags,
        options: &dependency.options,
      })
      .await
      .map_err(|source| ResolveError::Build {
        dependency: dependency.name.clone(),
        source,
      })
  }

  /// Resolve every dependency concurrently and update the pins in `lock`.
  ///
  /// With `refresh`, existing pins are ignored and every revision is looked up again.
  /// All tasks run to completion. A single failure is returned as is; several are returned
  /// together as [`ResolveError::Multiple`] in declaration order.
  pub async fn resolve_all(
    self: &Arc<Self>,
    dependencies: &[Dependency],
    lock: &mut LockFile,
    refresh: bool,
  ) -> Result<Vec<ResolvedDependency>, ResolveError> {
    let mut tasks = JoinSet::new();

    for (index, dependency) in dependencies.iter().enumerate() {
      let pinned = if refresh {
        None
      } else {
        lock.pinned(dependency).map(str::to_string)
      };
      let resolver = Arc::clone(self);
      let dependency = dependency.clone();

      tasks.spawn(async move {
        let result = async {
          let commit = resolver.commit_for(&dependency, pinned.as_deref()).await?;
          resolver.resolve(&dependency, &commit).await
        }
        .await;
        (index, result)
      });
    }

    let mut results: Vec<Option<Result<ResolvedDependency, ResolveError>>> =
      (0..dependencies.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok((index, result)) => results[index] = Some(result),
        Err(e) => return Err(ResolveError::Task(e.to_string())),
      }
    }

    let mut resolved = Vec::with_capacity(dependencies.len());
    let mut errors = Vec::new();
    for (dependency, result) in dependencies.iter().zip(results) {
      match result.unwrap_or_else(|| Err(ResolveError::Task(format!("no result for '{}'", dependency.name)))) {
        Ok(dep) => resolved.push((dependency, dep)),
        Err(e) => errors.push(e),
      }
    }

    if errors.len() > 1 {
      return Err(ResolveError::Multiple(errors));
    }
    if let Some(e) = errors.pop() {
      return Err(e);
    }

    for (dependency, dep) in &resolved {
      if lock.pinned(dependency) != Some(dep.commit.as_str()) {
        lock.pin(dependency, &dep.commit);
      }
    }
    lock.retain_declared(dependencies);

    Ok(resolved.into_iter().map(|(_, dep)| dep).collect())
  }
}
