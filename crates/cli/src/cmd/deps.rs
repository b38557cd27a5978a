//! Implementation of the `jfb deps` command.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

use jfb_lib::deps::{EntrySource, ResolvedDependency};

use super::{ProjectArgs, engine, engine_error, load_project};
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, truncate_hash};

#[derive(Serialize)]
struct DependencyOutput<'a> {
  name: &'a str,
  commit: &'a str,
  identity: &'a str,
  cached: bool,
  include_dirs: &'a [PathBuf],
  libraries: &'a [PathBuf],
}

impl<'a> From<&'a ResolvedDependency> for DependencyOutput<'a> {
  fn from(dep: &'a ResolvedDependency) -> Self {
    Self {
      name: &dep.name,
      commit: &dep.commit,
      identity: dep.identity.as_str(),
      cached: dep.source == EntrySource::Cached,
      include_dirs: &dep.manifest.include_dirs,
      libraries: &dep.manifest.libraries,
    }
  }
}

/// Execute the deps command.
///
/// Resolves, fetches and builds every declared dependency (reusing cache entries)
/// and prints what each one contributes to the link.
pub async fn cmd_deps(args: &ProjectArgs, output: OutputFormat) -> Result<()> {
  let project = load_project(args)?;
  let resolved = engine()
    .resolve_dependencies(&project, false)
    .await
    .map_err(|e| engine_error(e, "Failed to resolve dependencies".to_string()))?;

  if output.is_json() {
    let list: Vec<DependencyOutput> = resolved.iter().map(DependencyOutput::from).collect();
    return print_json(&list);
  }

  if resolved.is_empty() {
    print_info("No dependencies declared");
    return Ok(());
  }

  for dep in &resolved {
    let how = match dep.source {
      EntrySource::Cached => "cached",
      EntrySource::Built => "built",
    };
    print_success(&format!("{} @ {} ({how})", dep.name, truncate_hash(&dep.commit)));
    print_stat("Entry", dep.identity.as_str());
    for dir in &dep.manifest.include_dirs {
      print_stat("Include", &dir.display().to_string());
    }
    for lib in &dep.manifest.libraries {
      print_stat("Library", &lib.display().to_string());
    }
  }
  Ok(())
}
