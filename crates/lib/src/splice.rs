//! Merging built dependencies into a target's view of the project.
//!
//! Runs after dependency resolution and before graph construction: the include search
//! path handed to the graph builder and the compiler already contains dependency headers,
//! and the link receives dependency libraries.

use std::path::PathBuf;

use crate::deps::ResolvedDependency;
use crate::project::{IncludePrecedence, Target};

/// Include path and link inputs of one target after splicing in its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplicedView {
  /// Ordered `-I` search path without duplicates.
  pub include_dirs: Vec<PathBuf>,
  /// Dependency libraries in declaration order.
  pub libraries: Vec<PathBuf>,
  /// Sorted cache identities of the dependencies used.
  pub identities: Vec<String>,
}

/// Splice the dependencies `target` uses into its include path and link inputs.
pub fn splice(target: &Target, precedence: IncludePrecedence, dependencies: &[ResolvedDependency]) -> SplicedView {
  let used: Vec<&ResolvedDependency> = dependencies
    .iter()
    .filter(|d| target.uses_dependency(&d.name))
    .collect();

  let dependency_includes = used.iter().flat_map(|d| d.manifest.include_dirs.iter());
  let ordered: Vec<&PathBuf> = match precedence {
    IncludePrecedence::Project => target.include_dirs.iter().chain(dependency_includes).collect(),
    IncludePrecedence::Dependencies => dependency_includes.chain(target.include_dirs.iter()).collect(),
  };

  let mut view = SplicedView::default();
  for dir in ordered {
    if !view.include_dirs.contains(dir) {
      view.include_dirs.push(dir.clone());
    }
  }
  for library in used.iter().flat_map(|d| d.manifest.libraries.iter()) {
    if !view.libraries.contains(library) {
      view.libraries.push(library.clone());
    }
  }
  view.identities = used.iter().map(|d| d.identity.to_string()).collect();
  view.identities.sort();

  view
}
