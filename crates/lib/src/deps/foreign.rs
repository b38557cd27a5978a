//! CMake configure, build and install of a checked-out dependency.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::cache::ArtifactManifest;
use crate::process::{Invocation, ProcessOutput, ProcessRunner};

/// Library file extensions picked up from the install prefix.
const LIBRARY_EXTENSIONS: &[&str] = &["a", "lib", "so", "dylib"];

#[derive(Debug, Error)]
pub enum ForeignBuildError {
  #[error("tool '{tool}' not found")]
  ToolMissing { tool: String },

  #[error("failed to run '{tool}': {source}")]
  Spawn {
    tool: String,
    #[source]
    source: std::io::Error,
  },

  #[error("cmake {step} failed for '{dependency}'{}:\n{diagnostics}", exit_suffix(.code))]
  Failed {
    dependency: String,
    step: &'static str,
    code: Option<i32>,
    diagnostics: String,
  },

  #[error("no headers or libraries installed for '{dependency}' under {}", .prefix.display())]
  ArtifactNotFound { dependency: String, prefix: PathBuf },

  #[error("failed to prepare {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

fn exit_suffix(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!(" (exit code {code})"),
    None => " (terminated by signal)".to_string(),
  }
}

/// Directories and settings for one foreign build.
#[derive(Debug, Clone)]
pub struct ForeignBuild<'a> {
  pub dependency: &'a str,
  pub source_dir: &'a Path,
  pub build_dir: &'a Path,
  /// Absolute install prefix.
  pub install_dir: &'a Path,
  /// Profile flags followed by the dependency's own.
  pub cmake_flags: &'a [String],
  pub options: &'a BTreeMap<String, String>,
}

impl ForeignBuild<'_> {
  fn configure(&self, cmake: &str) -> Invocation {
    Invocation::new(cmake)
      .arg("-S")
      .arg(self.source_dir.display().to_string())
      .arg("-B")
      .arg(self.build_dir.display().to_string())
      .arg(format!("-DCMAKE_INSTALL_PREFIX={}", self.install_dir.display()))
      .args(self.cmake_flags.iter().cloned())
      .args(self.options.iter().map(|(key, value)| format!("-D{key}={value}")))
  }
}

/// Drives the `cmake` executable.
#[derive(Clone)]
pub struct CmakeBuilder {
  runner: Arc<dyn ProcessRunner>,
  cmake: String,
  jobs: usize,
}

impl CmakeBuilder {
  pub fn new(runner: Arc<dyn ProcessRunner>, cmake: impl Into<String>, jobs: usize) -> Self {
    Self {
      runner,
      cmake: cmake.into(),
      jobs: jobs.max(1),
    }
  }

  /// Configure, build and install, then scan the prefix for artifacts.
  pub async fn build(&self, build: &ForeignBuild<'_>) -> Result<ArtifactManifest, ForeignBuildError> {
    std::fs::create_dir_all(build.build_dir).map_err(|source| ForeignBuildError::Io {
      path: build.build_dir.to_path_buf(),
      source,
    })?;

    info!(dependency = build.dependency, "configuring");
    self.step(build.dependency, "configure", build.configure(&self.cmake)).await?;

    info!(dependency = build.dependency, jobs = self.jobs, "building");
    self
      .step(
        build.dependency,
        "build",
        Invocation::new(&self.cmake)
          .arg("--build")
          .arg(build.build_dir.display().to_string())
          .arg("--parallel")
          .arg(self.jobs.to_string()),
      )
      .await?;

    self
      .step(
        build.dependency,
        "install",
        Invocation::new(&self.cmake)
          .arg("--install")
          .arg(build.build_dir.display().to_string())
          .arg("--prefix")
          .arg(build.install_dir.display().to_string()),
      )
      .await?;

    let manifest = scan_prefix(build.install_dir);
    if manifest.include_dirs.is_empty() && manifest.libraries.is_empty() {
      return Err(ForeignBuildError::ArtifactNotFound {
        dependency: build.dependency.to_string(),
        prefix: build.install_dir.to_path_buf(),
      });
    }

    debug!(
      dependency = build.dependency,
      include_dirs = manifest.include_dirs.len(),
      libraries = manifest.libraries.len(),
      "artifacts collected"
    );
    Ok(manifest)
  }

  async fn step(
    &self,
    dependency: &str,
    step: &'static str,
    invocation: Invocation,
  ) -> Result<ProcessOutput, ForeignBuildError> {
    let output = self.runner.run(&invocation).await.map_err(|source| {
      if source.kind() == std::io::ErrorKind::NotFound {
        ForeignBuildError::ToolMissing {
          tool: self.cmake.clone(),
        }
      } else {
        ForeignBuildError::Spawn {
          tool: self.cmake.clone(),
          source,
        }
      }
    })?;

    if !output.success() {
      return Err(ForeignBuildError::Failed {
        dependency: dependency.to_string(),
        step,
        code: output.code,
        diagnostics: output.diagnostics(),
      });
    }
    Ok(output)
  }
}

/// Collect the include directory and library files under an install prefix.
///
/// When a library is installed both statically and dynamically only the static archive
/// is kept.
fn scan_prefix(prefix: &Path) -> ArtifactManifest {
  let mut manifest = ArtifactManifest::default();

  let include = prefix.join("include");
  if include.is_dir() {
    manifest.include_dirs.push(include);
  }

  let mut libraries: Vec<PathBuf> = ["lib", "lib64"]
    .iter()
    .map(|dir| prefix.join(dir))
    .filter(|dir| dir.is_dir())
    .flat_map(|dir| {
      WalkDir::new(dir)
        .max_depth(2)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
    })
    .filter(|path| {
      path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| LIBRARY_EXTENSIONS.contains(&e))
    })
    .collect();
  libraries.sort();

  let statics: Vec<PathBuf> = libraries
    .iter()
    .filter(|p| p.extension().is_some_and(|e| e == "a" || e == "lib"))
    .map(|p| p.with_extension(""))
    .collect();
  libraries.retain(|p| p.extension().is_some_and(|e| e == "a" || e == "lib") || !statics.contains(&p.with_extension("")));

  manifest.libraries = libraries;
  manifest
}
