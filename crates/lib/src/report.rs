//! Build outcome summary.

use std::path::PathBuf;
use std::time::Duration;

use crate::deps::{EntrySource, ResolvedDependency};
use crate::toolchain::InvokeError;

/// Error kinds surfaced per failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  Compile,
  Link,
  ToolMissing,
  Other,
}

/// One failed action, tagged with the node it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
  /// Source path for compiles, target name for links.
  pub node: String,
  pub kind: FailureKind,
  pub message: String,
  /// Tool output, verbatim.
  pub diagnostics: Option<String>,
}

impl ActionFailure {
  pub fn from_invoke(node: impl Into<String>, err: &InvokeError) -> Self {
    let kind = match err {
      InvokeError::CompileFailed { .. } => FailureKind::Compile,
      InvokeError::LinkFailed { .. } => FailureKind::Link,
      InvokeError::ToolMissing { .. } => FailureKind::ToolMissing,
      _ => FailureKind::Other,
    };
    Self {
      node: node.into(),
      kind,
      message: err.to_string(),
      diagnostics: err.diagnostics().map(str::to_string),
    }
  }

  pub fn is_fatal(&self) -> bool {
    self.kind == FailureKind::ToolMissing
  }
}

/// What happened to one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetReport {
  pub name: String,
  pub compiled: usize,
  pub up_to_date: usize,
  /// Units left undispatched after a failure.
  pub not_dispatched: usize,
  pub linked: bool,
  /// Set when the artifact is valid at the end of the build.
  pub artifact: Option<PathBuf>,
  pub failures: Vec<ActionFailure>,
  /// The target was not attempted because an earlier target failed.
  pub skipped: bool,
}

impl TargetReport {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      ..Default::default()
    }
  }

  pub fn is_success(&self) -> bool {
    !self.skipped && self.failures.is_empty()
  }

  /// Compile plus link actions actually performed.
  pub fn actions(&self) -> usize {
    self.compiled + usize::from(self.linked)
  }
}

/// Summary of one `build` invocation.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
  pub profile: String,
  pub dependencies: Vec<ResolvedDependency>,
  pub targets: Vec<TargetReport>,
  pub duration: Duration,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    self.targets.iter().all(TargetReport::is_success)
  }

  pub fn compiled(&self) -> usize {
    self.targets.iter().map(|t| t.compiled).sum()
  }

  pub fn up_to_date(&self) -> usize {
    self.targets.iter().map(|t| t.up_to_date).sum()
  }

  pub fn linked(&self) -> usize {
    self.targets.iter().filter(|t| t.linked).count()
  }

  /// Compile plus link actions across all targets.
  pub fn actions(&self) -> usize {
    self.targets.iter().map(TargetReport::actions).sum()
  }

  pub fn dependencies_cached(&self) -> usize {
    self
      .dependencies
      .iter()
      .filter(|d| d.source == EntrySource::Cached)
      .count()
  }

  pub fn dependencies_built(&self) -> usize {
    self
      .dependencies
      .iter()
      .filter(|d| d.source == EntrySource::Built)
      .count()
  }

  /// Every failed node across all targets.
  pub fn failures(&self) -> impl Iterator<Item = &ActionFailure> {
    self.targets.iter().flat_map(|t| t.failures.iter())
  }
}
