//! Graph construction from source roots.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use super::scan::{IncludeDirective, scan_includes};
use super::{BuildGraph, BuildNode, NodeKind, ScanError};
use crate::util::hash::{ContentHash, hash_bytes};

/// Everything the builder needs to know about one target.
#[derive(Debug, Clone)]
pub struct GraphInput<'a> {
  /// Directories walked for compilation units.
  pub source_dirs: &'a [PathBuf],
  /// Extensions (without dot) that mark a compilation unit.
  pub extensions: &'a [&'a str],
  /// Ordered `-I` search path.
  pub include_dirs: &'a [PathBuf],
  /// Compile fingerprint shared by every unit of the target.
  pub flags: ContentHash,
  /// Directory that receives object files.
  pub object_dir: &'a Path,
  /// Root that object paths are made relative to.
  pub root: &'a Path,
}

/// Scan the target's sources and build its include graph.
///
/// Fails on the first unresolvable quoted include or on any include cycle.
pub fn build_graph(input: &GraphInput<'_>) -> Result<BuildGraph, ScanError> {
  let units = discover_units(input.source_dirs, input.extensions)?;
  let root = dunce::canonicalize(input.root).unwrap_or_else(|_| input.root.to_path_buf());
  debug!(units = units.len(), "discovered compilation units");

  let mut contents: HashMap<PathBuf, ContentHash> = HashMap::new();
  let mut edges: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
  let mut queue: VecDeque<PathBuf> = units.iter().cloned().collect();
  let mut seen: HashSet<PathBuf> = units.iter().cloned().collect();

  while let Some(file) = queue.pop_front() {
    let bytes = fs::read(&file).map_err(|source| ScanError::Read {
      path: file.clone(),
      source,
    })?;
    contents.insert(file.clone(), hash_bytes(&bytes));

    let text = String::from_utf8_lossy(&bytes);
    let mut resolved = Vec::new();
    for directive in scan_includes(&text) {
      let Some(header) = resolve(&file, &directive, input.include_dirs)? else {
        continue;
      };
      trace!(file = %file.display(), header = %header.display(), "include edge");
      if seen.insert(header.clone()) {
        queue.push_back(header.clone());
      }
      if !resolved.contains(&header) {
        resolved.push(header);
      }
    }
    edges.insert(file, resolved);
  }

  let mut graph = BuildGraph::default();
  let mut all: Vec<&PathBuf> = contents.keys().collect();
  all.sort();
  for path in &all {
    let idx = graph.graph.add_node((*path).clone());
    graph.indices.insert((*path).clone(), idx);
  }
  for (from, targets) in &edges {
    let from_idx = graph.indices[from];
    for to in targets {
      graph.graph.add_edge(from_idx, graph.indices[to], ());
    }
  }

  verify_acyclic(&graph)?;

  let unit_set: HashSet<&PathBuf> = units.iter().collect();
  for path in all {
    let kind = if unit_set.contains(path) {
      NodeKind::CompileUnit
    } else {
      NodeKind::Header
    };
    let (flags, output) = match kind {
      NodeKind::CompileUnit => (
        Some(input.flags.clone()),
        Some(object_path(input.object_dir, &root, path)),
      ),
      NodeKind::Header => (None, None),
    };
    graph.nodes.insert(
      path.clone(),
      BuildNode {
        path: path.clone(),
        kind,
        includes: transitive_includes(path, &edges),
        content: contents[path].clone(),
        flags,
        output,
      },
    );
  }

  debug!(nodes = graph.len(), "source graph built");
  Ok(graph)
}

fn discover_units(source_dirs: &[PathBuf], extensions: &[&str]) -> Result<Vec<PathBuf>, ScanError> {
  let mut units = Vec::new();
  for dir in source_dirs {
    if !dir.is_dir() {
      warn!(dir = %dir.display(), "source directory does not exist");
      continue;
    }
    for entry in WalkDir::new(dir).follow_links(true) {
      let entry = entry.map_err(|source| ScanError::Walk {
        path: dir.clone(),
        source,
      })?;
      if !entry.file_type().is_file() {
        continue;
      }
      let matches = entry
        .path()
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e));
      if matches {
        let path = dunce::canonicalize(entry.path()).map_err(|source| ScanError::Read {
          path: entry.path().to_path_buf(),
          source,
        })?;
        units.push(path);
      }
    }
  }
  units.sort();
  units.dedup();
  Ok(units)
}

/// Resolve one directive the way the compiler would.
///
/// Quoted spellings try the including file's directory first, then the `-I` paths in
/// order. Angled spellings search only the `-I` paths and are left untracked when not
/// found there.
fn resolve(file: &Path, directive: &IncludeDirective, include_dirs: &[PathBuf]) -> Result<Option<PathBuf>, ScanError> {
  let local = (!directive.angled)
    .then(|| file.parent())
    .flatten()
    .map(Path::to_path_buf);

  for dir in local.iter().chain(include_dirs) {
    let candidate = dir.join(&directive.spelling);
    if candidate.is_file() {
      let canonical = dunce::canonicalize(&candidate).map_err(|source| ScanError::Read {
        path: candidate.clone(),
        source,
      })?;
      return Ok(Some(canonical));
    }
  }

  if directive.angled {
    trace!(spelling = %directive.spelling, "system include left untracked");
    return Ok(None);
  }
  if directive.optional {
    debug!(spelling = %directive.spelling, file = %file.display(), "optional include not present");
    return Ok(None);
  }

  Err(ScanError::Unresolved {
    file: file.to_path_buf(),
    line: directive.line,
    spelling: directive.spelling.clone(),
  })
}

fn verify_acyclic(graph: &BuildGraph) -> Result<(), ScanError> {
  for component in tarjan_scc(&graph.graph) {
    let is_cycle = component.len() > 1 || graph.graph.contains_edge(component[0], component[0]);
    if is_cycle {
      let mut members: Vec<PathBuf> = component.iter().map(|&i| graph.graph[i].clone()).collect();
      members.sort();
      return Err(ScanError::Cycle { members });
    }
  }
  Ok(())
}

/// Preorder walk of the include edges. Only called on an acyclic graph.
fn transitive_includes(start: &Path, edges: &HashMap<PathBuf, Vec<PathBuf>>) -> Vec<PathBuf> {
  let mut out = Vec::new();
  let mut seen = HashSet::new();
  let mut stack: Vec<&PathBuf> = edges.get(start).map(|e| e.iter().rev().collect()).unwrap_or_default();

  while let Some(next) = stack.pop() {
    if !seen.insert(next) {
      continue;
    }
    out.push(next.clone());
    if let Some(children) = edges.get(next) {
      stack.extend(children.iter().rev());
    }
  }

  out
}

/// `<object_dir>/<path relative to root>.o`, or a hashed name for files outside the root.
fn object_path(object_dir: &Path, root: &Path, unit: &Path) -> PathBuf {
  let mut relative = match unit.strip_prefix(root) {
    Ok(rel) => rel.as_os_str().to_owned(),
    Err(_) => {
      let name = unit.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
      let digest = hash_bytes(unit.to_string_lossy().as_bytes());
      std::ffi::OsString::from(format!("external/{}-{}", &digest.0[..12], name))
    }
  };
  relative.push(".o");
  object_dir.join(relative)
}
