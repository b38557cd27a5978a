mod build;
mod clean;
mod deps;
mod run;
mod update;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use jfb_lib::config::{Config, config_path};
use jfb_lib::deps::DependencyCache;
use jfb_lib::engine::{BuildError, Engine};
use jfb_lib::process::SystemRunner;
use jfb_lib::project::Project;

use crate::output::{print_error, print_warning};

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use deps::cmd_deps;
pub use run::cmd_run;
pub use update::cmd_update;

/// Locates the project and picks the profile.
#[derive(Debug, Clone, Args)]
pub struct ProjectArgs {
  /// Path to jfb.toml or the directory containing it
  #[arg(short, long, default_value = ".")]
  pub config: PathBuf,

  /// Build profile (debug, release or a [profile.*] table)
  #[arg(short, long, default_value = "debug")]
  pub profile: String,
}

/// Flags shared by commands that build.
#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
  #[command(flatten)]
  pub project: ProjectArgs,

  /// Maximum number of concurrent compiles
  #[arg(short, long)]
  pub jobs: Option<usize>,

  /// Build only this target
  #[arg(short, long)]
  pub target: Option<String>,
}

/// Load `jfb.toml` and flatten it for the selected profile.
pub fn load_project(args: &ProjectArgs) -> Result<Project> {
  let path = config_path(&args.config);
  let path =
    dunce::canonicalize(&path).with_context(|| format!("Failed to find project file {}", path.display()))?;
  let root = path
    .parent()
    .map(PathBuf::from)
    .context("Project file has no parent directory")?;

  let config = Config::load(&path).with_context(|| format!("Failed to load {}", path.display()))?;
  config
    .into_project(&root, &args.profile)
    .context("Failed to resolve project configuration")
}

/// Engine over real processes and the machine-global dependency cache.
pub fn engine() -> Engine {
  Engine::new(Arc::new(SystemRunner), Arc::new(DependencyCache::open_default()))
}

/// Print every dependency failure behind `err`, then wrap it with `context`.
pub fn engine_error(err: BuildError, context: String) -> anyhow::Error {
  if let BuildError::Resolve(resolve) = &err {
    let failures = resolve.failures();
    if failures.len() > 1 {
      for failure in failures {
        print_error(&failure.to_string());
      }
    }
    if resolve.is_tool_missing() {
      print_warning("Install git and cmake, or point JFB_GIT and JFB_CMAKE at them");
    }
  }
  anyhow::Error::new(err).context(context)
}
