//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, duration formatting, and the build summary.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use jfb_lib::report::{ActionFailure, BuildReport};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

/// One line per count, then every failure with its diagnostics on stderr.
pub fn print_report(project: &str, report: &BuildReport) {
  let duration = format_duration(report.duration);
  if report.is_success() {
    print_success(&format!("Built {} ({}) in {}", project, report.profile, duration));
  } else {
    print_error(&format!("Build of {} ({}) failed after {}", project, report.profile, duration));
  }

  print_stat("Compiled", &report.compiled().to_string());
  print_stat("Up to date", &report.up_to_date().to_string());
  print_stat("Linked", &report.linked().to_string());
  if !report.dependencies.is_empty() {
    print_stat(
      "Dependencies",
      &format!(
        "{} cached, {} built",
        report.dependencies_cached(),
        report.dependencies_built()
      ),
    );
  }

  for target in report.targets.iter().filter(|t| t.skipped) {
    print_warning(&format!("Skipped target '{}'", target.name));
  }
  for failure in report.failures() {
    print_failure(failure);
  }
}

fn print_failure(failure: &ActionFailure) {
  print_error(&format!("{}: {}", failure.node, failure.message));
  if let Some(diagnostics) = failure.diagnostics.as_deref() {
    for line in diagnostics.lines() {
      eprintln!("    {}", line);
    }
  }
}
