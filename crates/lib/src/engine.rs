//! Build orchestration.
//!
//! One [`Engine::build`] call runs the whole pipeline for a project:
//!
//! 1. Resolve dependencies (pin, fetch, build into the cache)
//! 2. Splice dependency headers and libraries into each target
//! 3. Scan sources into a [`BuildGraph`](crate::graph::BuildGraph)
//! 4. Classify compile-units against the target's [`BuildRecord`]
//! 5. Compile stale units on the worker pool, then link if needed
//! 6. Persist the record, including partial progress on failure
//!
//! Targets build in name order. After a target fails, later targets are skipped.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compile_commands::{self, CompileCommand};
use crate::consts::COMPILE_COMMANDS_FILENAME;
use crate::deps::lockfile::LockFileError;
use crate::deps::{DependencyCache, DependencyResolver, LockFile, ResolveError, ResolvedDependency};
use crate::graph::{GraphInput, NodeKind, ScanError, build_graph};
use crate::process::ProcessRunner;
use crate::project::{Project, Target, TargetKind};
use crate::record::{BuildRecord, LinkRecord, RecordError, UnitRecord};
use crate::report::{ActionFailure, BuildReport, TargetReport};
use crate::schedule::{CompileJob, run_compiles};
use crate::splice::splice;
use crate::stale::{LinkInputs, classify_units, link_staleness};
use crate::toolchain::{CompileRequest, LinkRequest, link};

/// Errors that stop a build before or between targets.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  #[error("target '{target}': {source}")]
  Scan {
    target: String,
    #[source]
    source: ScanError,
  },

  #[error("target '{target}' has no compilation units")]
  NoSources { target: String },

  #[error("unknown target '{0}'")]
  UnknownTarget(String),

  #[error(transparent)]
  LockFile(#[from] LockFileError),

  #[error(transparent)]
  Record(#[from] RecordError),

  #[error("failed to write {}: {source}", .path.display())]
  CompileCommands {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Per-invocation knobs that are not part of the project description.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  /// Build only this target.
  pub target: Option<String>,
  /// Ignore pinned commits and resolve every revision again.
  pub refresh_lock: bool,
}

/// Runs builds against one process runner and dependency cache.
pub struct Engine {
  runner: Arc<dyn ProcessRunner>,
  cache: Arc<DependencyCache>,
}

impl Engine {
  pub fn new(runner: Arc<dyn ProcessRunner>, cache: Arc<DependencyCache>) -> Self {
    Self { runner, cache }
  }

  pub fn cache(&self) -> &DependencyCache {
    &self.cache
  }

  /// Pin, fetch and build every declared dependency, updating `jfb.lock` when pins change.
  pub async fn resolve_dependencies(
    &self,
    project: &Project,
    refresh: bool,
  ) -> Result<Vec<ResolvedDependency>, BuildError> {
    let existing = LockFile::load(&project.lock_path)?;
    if project.dependencies.is_empty() && existing.is_none() {
      return Ok(Vec::new());
    }

    let mut lock = existing.clone().unwrap_or_default();
    let resolver = Arc::new(DependencyResolver::new(
      self.runner.clone(),
      self.cache.clone(),
      &project.tools,
      project.cmake_flags.clone(),
      project.parallelism(),
    ));

    info!(count = project.dependencies.len(), "resolving dependencies");
    let resolved = resolver.resolve_all(&project.dependencies, &mut lock, refresh).await?;

    if existing.as_ref() != Some(&lock) {
      lock.save(&project.lock_path)?;
      debug!(path = %project.lock_path.display(), "lock file updated");
    }
    Ok(resolved)
  }

  /// Build the project and summarize what happened.
  ///
  /// Compile and link failures are reported in the returned [`BuildReport`]; only
  /// failures that prevent scheduling at all are returned as errors.
  pub async fn build(&self, project: &Project, options: &BuildOptions) -> Result<BuildReport, BuildError> {
    let started = Instant::now();

    let mut targets: Vec<&Target> = match &options.target {
      Some(name) => vec![
        project
          .target(name)
          .ok_or_else(|| BuildError::UnknownTarget(name.clone()))?,
      ],
      None => project.targets.iter().collect(),
    };
    targets.sort_by(|a, b| a.name.cmp(&b.name));

    let dependencies = self.resolve_dependencies(project, options.refresh_lock).await?;

    let mut report = BuildReport {
      profile: project.profile.clone(),
      dependencies: dependencies.clone(),
      ..Default::default()
    };
    let mut commands = Vec::new();

    for target in targets {
      if report.targets.iter().any(|t| !t.is_success()) {
        let mut skipped = TargetReport::new(&target.name);
        skipped.skipped = true;
        report.targets.push(skipped);
        continue;
      }
      let target_report = self.build_target(project, target, &dependencies, &mut commands).await?;
      report.targets.push(target_report);
    }

    if project.compile_commands {
      let path = project.build_dir.join(COMPILE_COMMANDS_FILENAME);
      compile_commands::write(&path, commands).map_err(|source| BuildError::CompileCommands { path, source })?;
    }

    report.duration = started.elapsed();
    info!(
      compiled = report.compiled(),
      up_to_date = report.up_to_date(),
      linked = report.linked(),
      success = report.is_success(),
      "build finished"
    );
    Ok(report)
  }

  async fn build_target(
    &self,
    project: &Project,
    target: &Target,
    dependencies: &[ResolvedDependency],
    commands: &mut Vec<CompileCommand>,
  ) -> Result<TargetReport, BuildError> {
    let mut report = TargetReport::new(&target.name);
    let view = splice(target, project.include_precedence, dependencies);
    let target_dir = project.target_dir(target);
    let object_dir = target_dir.join("obj");

    let graph = build_graph(&GraphInput {
      source_dirs: &target.source_dirs,
      extensions: target.language.source_extensions(),
      include_dirs: &view.include_dirs,
      flags: target.compile_fingerprint(&view.include_dirs),
      object_dir: &object_dir,
      root: &project.root,
    })
    .map_err(|source| BuildError::Scan {
      target: target.name.clone(),
      source,
    })?;

    if graph.units().next().is_none() {
      return Err(BuildError::NoSources {
        target: target.name.clone(),
      });
    }

    let record_path = project.record_path(target);
    let mut record = BuildRecord::load_or_recover(&record_path);
    record.retain_units(|path| graph.node(path).is_some_and(|n| n.kind == NodeKind::CompileUnit));

    let classification = classify_units(&graph, &record);
    report.up_to_date = classification.fresh.len();
    info!(
      name = %target.name,
      stale = classification.stale.len(),
      fresh = classification.fresh.len(),
      "classified compile units"
    );

    let flags: Arc<[String]> = target.flags.compile.clone().into();
    let include_dirs: Arc<[PathBuf]> = view.include_dirs.clone().into();

    if project.compile_commands {
      for unit in graph.units() {
        if let Some(output) = &unit.output {
          commands.push(CompileCommand::new(
            &project.root,
            &CompileRequest {
              compiler: &target.toolchain.compiler,
              flags: &flags,
              include_dirs: &include_dirs,
              source: &unit.path,
              output,
            },
          ));
        }
      }
    }

    let jobs: Vec<CompileJob> = classification
      .stale
      .iter()
      .filter_map(|(path, reason)| {
        let output = graph.node(path)?.output.clone()?;
        debug!(unit = %path.display(), %reason, "scheduling compile");
        Some(CompileJob {
          source: path.clone(),
          output,
          compiler: target.toolchain.compiler.clone(),
          flags: flags.clone(),
          include_dirs: include_dirs.clone(),
        })
      })
      .collect();

    let outcome = run_compiles(self.runner.clone(), jobs, project.parallelism()).await;

    for (source, hash) in &outcome.compiled {
      if let Some(node) = graph.node(source)
        && let (Some(flags), Some(output)) = (&node.flags, &node.output)
      {
        record.set_unit(
          source.clone(),
          UnitRecord {
            content: node.content.clone(),
            flags: flags.clone(),
            headers: graph.header_fingerprints(node),
            output: output.clone(),
            output_hash: hash.clone(),
          },
        );
      }
    }
    report.compiled = outcome.compiled.len();
    report.not_dispatched = outcome.not_dispatched.len();
    report.failures = outcome
      .failed
      .iter()
      .map(|(source, err)| ActionFailure::from_invoke(source.display().to_string(), err))
      .collect();

    if !outcome.is_success() {
      warn!(name = %target.name, failed = report.failures.len(), "skipping link after compile failure");
      record.save(&record_path)?;
      return Ok(report);
    }

    let objects: BTreeMap<PathBuf, _> = graph
      .units()
      .filter_map(|unit| record.unit(&unit.path))
      .map(|unit| (unit.output.clone(), unit.output_hash.clone()))
      .collect();
    let artifact = project.artifact_path(target);
    let link_flags = target.link_fingerprint(&view.libraries);

    let inputs = LinkInputs {
      flags: &link_flags,
      objects: &objects,
      dependencies: &view.identities,
      output: &artifact,
      rebuilt_any: !outcome.compiled.is_empty(),
    };
    match link_staleness(&inputs, record.link.as_ref()) {
      None => {
        debug!(name = %target.name, "artifact up to date");
        report.artifact = Some(artifact);
      }
      Some(reason) => {
        info!(name = %target.name, %reason, "linking");
        let object_paths: Vec<PathBuf> = objects.keys().cloned().collect();
        let tool = match target.kind {
          TargetKind::Executable => &target.toolchain.linker,
          TargetKind::StaticLibrary => &target.toolchain.archiver,
        };
        let request = LinkRequest {
          target: &target.name,
          kind: target.kind,
          tool,
          objects: &object_paths,
          libraries: &view.libraries,
          flags: &target.flags.link,
          output: &artifact,
        };

        match link(self.runner.as_ref(), &request).await {
          Ok(hash) => {
            record.link = Some(LinkRecord {
              flags: link_flags,
              inputs: objects,
              dependencies: view.identities.clone(),
              output: artifact.clone(),
              output_hash: hash,
            });
            report.linked = true;
            report.artifact = Some(artifact);
          }
          Err(err) => {
            record.link = None;
            report.failures.push(ActionFailure::from_invoke(&target.name, &err));
          }
        }
      }
    }

    record.save(&record_path)?;
    Ok(report)
  }
}
