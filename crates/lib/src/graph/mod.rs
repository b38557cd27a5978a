//! Source graph construction.
//!
//! This module handles:
//! - Discovering compilation units under a target's source roots
//! - Extracting and resolving `#include` directives ([`scan`])
//! - Building the acyclic file → header graph and each node's transitive include set
//!
//! The graph is rebuilt on every invocation and never persisted.

mod builder;
pub mod scan;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;

use crate::util::hash::ContentHash;

pub use builder::{GraphInput, build_graph};

/// Whether a node is compiled on its own or only reached through includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
  CompileUnit,
  Header,
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      NodeKind::CompileUnit => write!(f, "compile-unit"),
      NodeKind::Header => write!(f, "header"),
    }
  }
}

/// A source file in the graph, identified by its canonical path.
#[derive(Debug, Clone)]
pub struct BuildNode {
  pub path: PathBuf,
  pub kind: NodeKind,
  /// Transitive include set, in first-reached order, without duplicates.
  pub includes: Vec<PathBuf>,
  pub content: ContentHash,
  /// Compile fingerprint; set for compile-units only.
  pub flags: Option<ContentHash>,
  /// Object file; set for compile-units only.
  pub output: Option<PathBuf>,
}

/// Errors raised while scanning sources.
#[derive(Debug, Error)]
pub enum ScanError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("{file}:{line}: cannot resolve include \"{spelling}\"")]
  Unresolved { file: PathBuf, line: usize, spelling: String },

  #[error("include cycle between {}", format_cycle(.members))]
  Cycle { members: Vec<PathBuf> },
}

fn format_cycle(members: &[PathBuf]) -> String {
  members
    .iter()
    .map(|m| m.display().to_string())
    .collect::<Vec<_>>()
    .join(", ")
}

/// The file → header graph of one target.
#[derive(Debug, Default)]
pub struct BuildGraph {
  graph: DiGraph<PathBuf, ()>,
  indices: HashMap<PathBuf, NodeIndex>,
  nodes: BTreeMap<PathBuf, BuildNode>,
}

impl BuildGraph {
  pub fn node(&self, path: &Path) -> Option<&BuildNode> {
    self.nodes.get(path)
  }

  /// Compile-units in path order.
  pub fn units(&self) -> impl Iterator<Item = &BuildNode> {
    self.nodes.values().filter(|n| n.kind == NodeKind::CompileUnit)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Files a node includes directly.
  #[cfg(test)]
  pub(crate) fn direct_includes(&self, path: &Path) -> Vec<&Path> {
    let Some(&idx) = self.indices.get(path) else {
      return Vec::new();
    };
    let mut found: Vec<&Path> = self
      .graph
      .neighbors_directed(idx, petgraph::Direction::Outgoing)
      .map(|n| self.graph[n].as_path())
      .collect();
    found.sort();
    found
  }

  /// Compile-units whose transitive include set contains `header`.
  #[cfg(test)]
  pub(crate) fn units_including(&self, header: &Path) -> Vec<&BuildNode> {
    self
      .units()
      .filter(|u| u.includes.iter().any(|h| h == header))
      .collect()
  }

  /// Fingerprint of every header in a unit's include set.
  pub fn header_fingerprints(&self, unit: &BuildNode) -> BTreeMap<PathBuf, ContentHash> {
    unit
      .includes
      .iter()
      .filter_map(|h| self.nodes.get(h).map(|n| (h.clone(), n.content.clone())))
      .collect()
  }
}
