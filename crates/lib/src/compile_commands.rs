//! `compile_commands.json` emission for editor tooling.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::toolchain::CompileRequest;
use crate::util::fs::write_atomic;

/// One entry of a JSON compilation database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileCommand {
  pub directory: PathBuf,
  pub file: PathBuf,
  pub arguments: Vec<String>,
  pub output: PathBuf,
}

impl CompileCommand {
  pub fn new(directory: &Path, request: &CompileRequest<'_>) -> Self {
    Self {
      directory: directory.to_path_buf(),
      file: request.source.to_path_buf(),
      arguments: request.invocation().argv(),
      output: request.output.to_path_buf(),
    }
  }
}

/// Write the database, sorted by file then output.
pub fn write(path: &Path, mut commands: Vec<CompileCommand>) -> io::Result<()> {
  commands.sort_by(|a, b| a.file.cmp(&b.file).then_with(|| a.output.cmp(&b.output)));
  let mut content = serde_json::to_string_pretty(&commands).map_err(io::Error::other)?;
  content.push('\n');
  write_atomic(path, content.as_bytes())?;
  debug!(path = %path.display(), entries = commands.len(), "wrote compilation database");
  Ok(())
}
