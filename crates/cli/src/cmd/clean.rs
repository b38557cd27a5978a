//! Implementation of the `jfb clean` command.
//!
//! Removes project outputs. The machine-global dependency cache is left alone.

use std::fs;

use anyhow::{Context, Result};

use super::{ProjectArgs, load_project};
use crate::output::{print_info, print_success};

/// Execute the clean command.
///
/// Removes the selected profile's build directory, or the whole workspace build
/// directory with `all`.
pub fn cmd_clean(args: &ProjectArgs, all: bool) -> Result<()> {
  let project = load_project(args)?;
  let dir = if all {
    project.build_dir.parent().unwrap_or(project.build_dir.as_path()).to_path_buf()
  } else {
    project.build_dir.clone()
  };

  if !dir.exists() {
    print_info("Nothing to clean");
    return Ok(());
  }

  fs::remove_dir_all(&dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
  print_success(&format!("Removed {}", dir.display()));
  Ok(())
}
