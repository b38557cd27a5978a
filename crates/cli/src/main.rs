mod cmd;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, ProjectArgs};
use output::{OutputFormat, print_error};

/// jfb - incremental builds for C and C++ projects
#[derive(Parser)]
#[command(name = "jfb")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the project and its dependencies
  Build {
    #[command(flatten)]
    args: BuildArgs,
  },

  /// Build, then execute an executable target
  Run {
    #[command(flatten)]
    args: BuildArgs,

    /// Arguments passed to the executable
    #[arg(last = true)]
    run_args: Vec<String>,
  },

  /// Remove build outputs
  Clean {
    #[command(flatten)]
    project: ProjectArgs,

    /// Remove the outputs of every profile
    #[arg(long)]
    all: bool,
  },

  /// Re-resolve every dependency revision and rewrite jfb.lock
  Update {
    #[command(flatten)]
    project: ProjectArgs,
  },

  /// Fetch and build dependencies, then list their artifacts
  Deps {
    #[command(flatten)]
    project: ProjectArgs,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "info" } else { "warn" };
  let filter = EnvFilter::try_from_env("JFB_LOG").unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Build { args } => cmd::cmd_build(&args).await.map(|()| ExitCode::SUCCESS),
    Commands::Run { args, run_args } => cmd::cmd_run(&args, &run_args).await,
    Commands::Clean { project, all } => cmd::cmd_clean(&project, all).map(|()| ExitCode::SUCCESS),
    Commands::Update { project } => cmd::cmd_update(&project).await.map(|()| ExitCode::SUCCESS),
    Commands::Deps { project, output } => cmd::cmd_deps(&project, output).await.map(|()| ExitCode::SUCCESS),
  };

  match result {
    Ok(code) => code,
    Err(err) => {
      print_error(&format!("{err:#}"));
      ExitCode::FAILURE
    }
  }
}
