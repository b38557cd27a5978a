//! Implementation of the `jfb build` command.

use anyhow::{Result, bail};
use tracing::info;

use jfb_lib::engine::BuildOptions;
use jfb_lib::project::Project;
use jfb_lib::report::BuildReport;

use super::{BuildArgs, engine, engine_error, load_project};
use crate::output::print_report;

/// Execute the build command.
///
/// Prints the build summary and fails if any compile or link failed.
pub async fn cmd_build(args: &BuildArgs) -> Result<()> {
  let project = load_project(&args.project)?;
  let report = build(&project, args).await?;
  if !report.is_success() {
    bail!("build failed");
  }
  Ok(())
}

/// Build `project` with the command line overrides applied and print the summary.
pub(super) async fn build(project: &Project, args: &BuildArgs) -> Result<BuildReport> {
  let mut project = project.clone();
  if args.jobs.is_some() {
    project.jobs = args.jobs;
  }

  info!(project = %project.name, profile = %project.profile, "building");
  let options = BuildOptions {
    target: args.target.clone(),
    refresh_lock: false,
  };
  let report = engine()
    .build(&project, &options)
    .await
    .map_err(|e| engine_error(e, format!("Failed to build {}", project.name)))?;

  print_report(&project.name, &report);
  Ok(report)
}
