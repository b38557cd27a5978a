//! External process execution.
//!
//! Every external tool (compiler, linker, archiver, git, cmake) is run through the
//! [`ProcessRunner`] capability so the engine never depends on a concrete process
//! mechanism. [`SystemRunner`] is the real implementation; tests substitute fakes.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

/// A fully specified external-process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
  /// Program name or path.
  pub program: String,
  /// Arguments, not including the program.
  pub args: Vec<String>,
  /// Working directory, or the current one if `None`.
  pub cwd: Option<PathBuf>,
  /// Extra environment variables layered over the inherited environment.
  pub env: BTreeMap<String, String>,
}

impl Invocation {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: None,
      env: BTreeMap::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.cwd = Some(dir.into());
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  /// The argument vector including the program, as a compilation database expects.
  pub fn argv(&self) -> Vec<String> {
    std::iter::once(self.program.clone())
      .chain(self.args.iter().cloned())
      .collect()
  }
}

impl fmt::Display for Invocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      if arg.contains(char::is_whitespace) {
        write!(f, " \"{}\"", arg)?;
      } else {
        write!(f, " {}", arg)?;
      }
    }
    Ok(())
  }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
  /// Exit code, or `None` if the process was killed by a signal.
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl ProcessOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }

  /// Everything the tool printed, stderr first, suitable for showing verbatim.
  pub fn diagnostics(&self) -> String {
    match (self.stderr.trim_end().is_empty(), self.stdout.trim_end().is_empty()) {
      (false, false) => format!("{}\n{}", self.stderr.trim_end(), self.stdout.trim_end()),
      (false, true) => self.stderr.trim_end().to_string(),
      (true, false) => self.stdout.trim_end().to_string(),
      (true, true) => String::new(),
    }
  }
}

/// Capability to run an external process and capture its output.
///
/// Implementations return `io::ErrorKind::NotFound` when the program cannot be located;
/// callers map that to their own "tool missing" error.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
  async fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;
}

/// Runs processes on the host with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
  async fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
    debug!(cmd = %invocation, cwd = ?invocation.cwd, "spawning process");

    let mut command = Command::new(&invocation.program);
    command.args(&invocation.args).kill_on_drop(true);
    if let Some(cwd) = &invocation.cwd {
      command.current_dir(cwd);
    }
    for (key, value) in &invocation.env {
      command.env(key, value);
    }

    let output = command.output().await?;

    let result = ProcessOutput {
      code: output.status.code(),
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !result.stderr.is_empty() {
      trace!(stderr = %result.stderr, "process stderr");
    }

    Ok(result)
  }
}
