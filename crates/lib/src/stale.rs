//! Staleness classification.
//!
//! Compares the freshly scanned graph against the persisted [`BuildRecord`]. Any doubt
//! (an unreadable output, a record for a different output path) counts as stale.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::graph::{BuildGraph, BuildNode};
use crate::record::{BuildRecord, LinkRecord, UnitRecord};
use crate::util::hash::{ContentHash, hash_file};

/// Why a compile-unit must be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
  NotRecorded,
  SourceChanged,
  FlagsChanged,
  HeaderChanged(PathBuf),
  /// A header was added to or removed from the include set.
  HeaderSetChanged,
  OutputMissing,
  OutputModified,
}

impl fmt::Display for StaleReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StaleReason::NotRecorded => write!(f, "not built before"),
      StaleReason::SourceChanged => write!(f, "source changed"),
      StaleReason::FlagsChanged => write!(f, "flags changed"),
      StaleReason::HeaderChanged(h) => write!(f, "header {} changed", h.display()),
      StaleReason::HeaderSetChanged => write!(f, "include set changed"),
      StaleReason::OutputMissing => write!(f, "object missing"),
      StaleReason::OutputModified => write!(f, "object modified"),
    }
  }
}

/// Why the target artifact must be relinked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkReason {
  NotRecorded,
  InputsRebuilt,
  InputSetChanged,
  FlagsChanged,
  DependenciesChanged,
  OutputMissing,
  OutputModified,
}

impl fmt::Display for LinkReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      LinkReason::NotRecorded => "not linked before",
      LinkReason::InputsRebuilt => "objects rebuilt",
      LinkReason::InputSetChanged => "object set changed",
      LinkReason::FlagsChanged => "link flags changed",
      LinkReason::DependenciesChanged => "dependencies changed",
      LinkReason::OutputMissing => "artifact missing",
      LinkReason::OutputModified => "artifact modified",
    };
    f.write_str(text)
  }
}

/// Classify one compile-unit. `None` means up to date.
pub fn unit_staleness(
  node: &BuildNode,
  headers: &BTreeMap<PathBuf, ContentHash>,
  record: Option<&UnitRecord>,
) -> Option<StaleReason> {
  let Some(record) = record else {
    return Some(StaleReason::NotRecorded);
  };

  if record.content != node.content {
    return Some(StaleReason::SourceChanged);
  }
  if node.flags.as_ref() != Some(&record.flags) {
    return Some(StaleReason::FlagsChanged);
  }
  if !headers.keys().eq(record.headers.keys()) {
    return Some(StaleReason::HeaderSetChanged);
  }
  if let Some((path, _)) = headers.iter().find(|(path, hash)| record.headers.get(*path) != Some(*hash)) {
    return Some(StaleReason::HeaderChanged(path.clone()));
  }
  if node.output.as_deref() != Some(record.output.as_path()) {
    return Some(StaleReason::OutputMissing);
  }

  output_state(&record.output, &record.output_hash).map(|state| match state {
    OutputState::Missing => StaleReason::OutputMissing,
    OutputState::Modified => StaleReason::OutputModified,
  })
}

/// Stale and up-to-date compile-units of a target, each in path order.
#[derive(Debug, Default)]
pub struct Classification {
  pub stale: Vec<(PathBuf, StaleReason)>,
  pub fresh: Vec<PathBuf>,
}

/// Classify every compile-unit in the graph.
pub fn classify_units(graph: &BuildGraph, record: &BuildRecord) -> Classification {
  let mut result = Classification::default();
  for unit in graph.units() {
    let headers = graph.header_fingerprints(unit);
    match unit_staleness(unit, &headers, record.unit(&unit.path)) {
      Some(reason) => {
        trace!(unit = %unit.path.display(), %reason, "stale");
        result.stale.push((unit.path.clone(), reason));
      }
      None => result.fresh.push(unit.path.clone()),
    }
  }
  result
}

/// Current inputs of the link step.
#[derive(Debug)]
pub struct LinkInputs<'a> {
  pub flags: &'a ContentHash,
  /// Object file → current hash.
  pub objects: &'a BTreeMap<PathBuf, ContentHash>,
  /// Sorted dependency identities.
  pub dependencies: &'a [String],
  pub output: &'a Path,
  /// Whether any object was recompiled in this invocation.
  pub rebuilt_any: bool,
}

/// Classify the link step. `None` means the artifact is up to date.
pub fn link_staleness(inputs: &LinkInputs<'_>, record: Option<&LinkRecord>) -> Option<LinkReason> {
  let Some(record) = record else {
    return Some(LinkReason::NotRecorded);
  };

  if inputs.rebuilt_any {
    return Some(LinkReason::InputsRebuilt);
  }
  if !inputs.objects.keys().eq(record.inputs.keys()) {
    return Some(LinkReason::InputSetChanged);
  }
  if inputs.objects != &record.inputs {
    return Some(LinkReason::InputsRebuilt);
  }
  if inputs.flags != &record.flags {
    return Some(LinkReason::FlagsChanged);
  }
  if inputs.dependencies != record.dependencies.as_slice() {
    return Some(LinkReason::DependenciesChanged);
  }
  if inputs.output != record.output {
    return Some(LinkReason::OutputMissing);
  }

  output_state(&record.output, &record.output_hash).map(|state| match state {
    OutputState::Missing => LinkReason::OutputMissing,
    OutputState::Modified => LinkReason::OutputModified,
  })
}

enum OutputState {
  Missing,
  Modified,
}

fn output_state(path: &Path, expected: &ContentHash) -> Option<OutputState> {
  match hash_file(path) {
    Ok(actual) if &actual == expected => None,
    Ok(_) => Some(OutputState::Modified),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Some(OutputState::Missing),
    Err(_) => Some(OutputState::Modified),
  }
}
