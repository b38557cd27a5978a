//! Implementation of the `jfb run` command.

use std::process::ExitCode;

use anyhow::{Context, Result, bail};

use jfb_lib::project::{Project, Target, TargetKind};

use super::{BuildArgs, load_project};
use crate::output::print_info;

/// Execute the run command.
///
/// Builds the project, then runs `--target` (or the first executable target in
/// name order) with `run_args`. The exit status of the program becomes ours.
pub async fn cmd_run(args: &BuildArgs, run_args: &[String]) -> Result<ExitCode> {
  let project = load_project(&args.project)?;
  let target = runnable_target(&project, args.target.as_deref())?.clone();

  let report = super::build::build(&project, args).await?;
  if !report.is_success() {
    bail!("build failed");
  }

  let artifact = project.artifact_path(&target);
  print_info(&format!("Running {}", artifact.display()));
  let status = tokio::process::Command::new(&artifact)
    .args(run_args)
    .current_dir(&project.root)
    .status()
    .await
    .with_context(|| format!("Failed to execute {}", artifact.display()))?;

  // Killed by a signal: no code to forward.
  let code = status.code().unwrap_or(1);
  Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn runnable_target<'a>(project: &'a Project, name: Option<&str>) -> Result<&'a Target> {
  match name {
    Some(name) => {
      let target = project
        .target(name)
        .with_context(|| format!("Unknown target '{name}'"))?;
      if target.kind != TargetKind::Executable {
        bail!("Target '{name}' is not an executable");
      }
      Ok(target)
    }
    None => project
      .targets
      .iter()
      .find(|t| t.kind == TargetKind::Executable)
      .context("Project has no executable target"),
  }
}
