//! Implementation of the `jfb update` command.
//!
//! Discards the commits pinned in jfb.lock, resolves every dependency revision
//! again and builds any entry the new commits require.

use std::time::Instant;

use anyhow::Result;
use owo_colors::{OwoColorize, Stream};

use super::{ProjectArgs, engine, engine_error, load_project};
use crate::output::{format_duration, print_info, print_stat, print_success, symbols, truncate_hash};

/// Execute the update command.
pub async fn cmd_update(args: &ProjectArgs) -> Result<()> {
  let start = Instant::now();
  let project = load_project(args)?;
  if project.dependencies.is_empty() {
    print_info("No dependencies declared");
    return Ok(());
  }

  let resolved = engine()
    .resolve_dependencies(&project, true)
    .await
    .map_err(|e| engine_error(e, "Failed to update dependencies".to_string()))?;

  for dep in &resolved {
    println!(
      "  {} {} {}",
      symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      dep.name.if_supports_color(Stream::Stdout, |s| s.cyan()),
      truncate_hash(&dep.commit).if_supports_color(Stream::Stdout, |s| s.green())
    );
  }

  print_success(&format!("Lock file updated: {}", project.lock_path.display()));
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}
