//! Compiler, linker and archiver invocation.
//!
//! Every tool writes to `<output>.tmp`; the file is renamed into place only after the
//! tool exits 0 and the temporary output exists, so an interrupted or failed action never
//! leaves a partial object where the record expects a valid one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::process::{Invocation, ProcessOutput, ProcessRunner};
use crate::project::TargetKind;
use crate::util::fs::{remove_if_exists, temp_sibling};
use crate::util::hash::{ContentHash, hash_file};

/// Errors from running a toolchain action.
#[derive(Debug, Error)]
pub enum InvokeError {
  #[error("tool '{tool}' not found")]
  ToolMissing { tool: String },

  #[error("failed to run '{tool}': {source}")]
  Spawn {
    tool: String,
    #[source]
    source: io::Error,
  },

  #[error("compilation of {} failed{}", .node.display(), exit_suffix(.code))]
  CompileFailed {
    node: PathBuf,
    code: Option<i32>,
    diagnostics: String,
  },

  #[error("linking '{target}' failed{}", exit_suffix(.code))]
  LinkFailed {
    target: String,
    code: Option<i32>,
    diagnostics: String,
  },

  #[error("'{tool}' succeeded but did not produce {}", .path.display())]
  OutputMissing { tool: String, path: PathBuf },

  #[error("action for {} aborted: {reason}", .node.display())]
  Aborted { node: PathBuf, reason: String },

  #[error("i/o error on {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn exit_suffix(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!(" (exit code {code})"),
    None => " (terminated by signal)".to_string(),
  }
}

impl InvokeError {
  /// Whether this failure means no further actions can succeed.
  pub fn is_fatal(&self) -> bool {
    matches!(self, InvokeError::ToolMissing { .. })
  }

  /// Tool output to show the user verbatim, if any.
  pub fn diagnostics(&self) -> Option<&str> {
    match self {
      InvokeError::CompileFailed { diagnostics, .. } | InvokeError::LinkFailed { diagnostics, .. } => {
        Some(diagnostics.as_str())
      }
      _ => None,
    }
  }
}

/// One compile action.
#[derive(Debug, Clone)]
pub struct CompileRequest<'a> {
  pub compiler: &'a str,
  pub flags: &'a [String],
  pub include_dirs: &'a [PathBuf],
  pub source: &'a Path,
  pub output: &'a Path,
}

impl CompileRequest<'_> {
  /// The invocation writing to `output`; `compile` runs it against a temporary path.
  pub fn invocation_to(&self, output: &Path) -> Invocation {
    Invocation::new(self.compiler)
      .args(self.flags.iter().cloned())
      .args(self.include_dirs.iter().map(|d| format!("-I{}", d.display())))
      .arg("-c")
      .arg(self.source.display().to_string())
      .arg("-o")
      .arg(output.display().to_string())
  }

  pub fn invocation(&self) -> Invocation {
    self.invocation_to(self.output)
  }
}

/// One link or archive action.
#[derive(Debug, Clone)]
pub struct LinkRequest<'a> {
  pub target: &'a str,
  pub kind: TargetKind,
  /// Linker for executables, archiver for static libraries.
  pub tool: &'a str,
  pub objects: &'a [PathBuf],
  /// Dependency libraries; ignored when archiving.
  pub libraries: &'a [PathBuf],
  pub flags: &'a [String],
  pub output: &'a Path,
}

impl LinkRequest<'_> {
  pub fn invocation_to(&self, output: &Path) -> Invocation {
    let objects = self.objects.iter().map(|o| o.display().to_string());
    match self.kind {
      TargetKind::Executable => Invocation::new(self.tool)
        .args(objects)
        .args(self.libraries.iter().map(|l| l.display().to_string()))
        .args(self.flags.iter().cloned())
        .arg("-o")
        .arg(output.display().to_string()),
      TargetKind::StaticLibrary => Invocation::new(self.tool)
        .arg("rcs")
        .arg(output.display().to_string())
        .args(objects),
    }
  }
}

/// Compile one unit and return the hash of the produced object.
pub async fn compile(runner: &dyn ProcessRunner, request: &CompileRequest<'_>) -> Result<ContentHash, InvokeError> {
  let temp = prepare_output(request.output)?;
  let invocation = request.invocation_to(&temp);
  debug!(source = %request.source.display(), "compiling");

  let output = run_tool(runner, &invocation).await?;
  if !output.success() {
    discard(&temp);
    return Err(InvokeError::CompileFailed {
      node: request.source.to_path_buf(),
      code: output.code,
      diagnostics: output.diagnostics(),
    });
  }

  commit_output(request.compiler, &temp, request.output)
}

/// Link or archive a target and return the hash of the artifact.
pub async fn link(runner: &dyn ProcessRunner, request: &LinkRequest<'_>) -> Result<ContentHash, InvokeError> {
  let temp = prepare_output(request.output)?;
  let invocation = request.invocation_to(&temp);
  debug!(target_name = request.target, objects = request.objects.len(), "linking");

  let output = run_tool(runner, &invocation).await?;
  if !output.success() {
    discard(&temp);
    return Err(InvokeError::LinkFailed {
      target: request.target.to_string(),
      code: output.code,
      diagnostics: output.diagnostics(),
    });
  }

  commit_output(request.tool, &temp, request.output)
}

async fn run_tool(runner: &dyn ProcessRunner, invocation: &Invocation) -> Result<ProcessOutput, InvokeError> {
  runner.run(invocation).await.map_err(|source| {
    if source.kind() == io::ErrorKind::NotFound {
      InvokeError::ToolMissing {
        tool: invocation.program.clone(),
      }
    } else {
      InvokeError::Spawn {
        tool: invocation.program.clone(),
        source,
      }
    }
  })
}

/// Create the output's parent and clear any stale temporary file.
fn prepare_output(output: &Path) -> Result<PathBuf, InvokeError> {
  if let Some(parent) = output.parent() {
    fs::create_dir_all(parent).map_err(|source| InvokeError::Io {
      path: parent.to_path_buf(),
      source,
    })?;
  }
  let temp = temp_sibling(output);
  remove_if_exists(&temp).map_err(|source| InvokeError::Io {
    path: temp.clone(),
    source,
  })?;
  Ok(temp)
}

fn commit_output(tool: &str, temp: &Path, output: &Path) -> Result<ContentHash, InvokeError> {
  if !temp.is_file() {
    return Err(InvokeError::OutputMissing {
      tool: tool.to_string(),
      path: output.to_path_buf(),
    });
  }
  fs::rename(temp, output).map_err(|source| InvokeError::Io {
    path: output.to_path_buf(),
    source,
  })?;
  hash_file(output).map_err(|source| InvokeError::Io {
    path: output.to_path_buf(),
    source,
  })
}

fn discard(temp: &Path) {
  if let Err(e) = remove_if_exists(temp) {
    debug!(path = %temp.display(), error = %e, "could not remove temporary output");
  }
}
