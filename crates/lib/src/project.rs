//! In-memory project description consumed by the build engine.
//!
//! A [`Project`] is produced from `jfb.toml` by [`crate::config`], with every path made
//! absolute and every flag already flattened for the selected profile.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::consts::RECORD_FILENAME;
use crate::util::hash::{ContentHash, hash_strings};

/// What a target produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
  #[default]
  #[serde(rename = "executable")]
  Executable,
  #[serde(rename = "staticlib")]
  StaticLibrary,
}

/// Source language of a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Language {
  #[default]
  #[serde(rename = "c")]
  C,
  #[serde(rename = "cpp", alias = "c++", alias = "cc", alias = "cxx")]
  Cpp,
}

impl Language {
  /// File extensions treated as compilation units.
  pub fn source_extensions(self) -> &'static [&'static str] {
    match self {
      Language::C => &["c"],
      Language::Cpp => &["cpp", "cc", "cxx", "c++"],
    }
  }
}

/// Whether project include paths are searched before or after dependency paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncludePrecedence {
  /// Project paths first, so a project may override a dependency header.
  #[default]
  Project,
  Dependencies,
}

/// Executables used to build one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
  pub compiler: String,
  pub linker: String,
  pub archiver: String,
}

/// Flattened compile and link flags for one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
  pub compile: Vec<String>,
  pub link: Vec<String>,
}

/// A single build target.
#[derive(Debug, Clone)]
pub struct Target {
  pub name: String,
  pub kind: TargetKind,
  pub language: Language,
  /// Absolute source roots.
  pub source_dirs: Vec<PathBuf>,
  /// Absolute project include paths, in search order.
  pub include_dirs: Vec<PathBuf>,
  /// Names of the dependencies this target consumes; `None` means all of them.
  pub dependencies: Option<Vec<String>>,
  pub toolchain: Toolchain,
  pub flags: FlagSet,
}

impl Target {
  /// Artifact file name for this target.
  pub fn artifact_name(&self) -> String {
    match self.kind {
      TargetKind::Executable if cfg!(windows) => format!("{}.exe", self.name),
      TargetKind::Executable => self.name.clone(),
      TargetKind::StaticLibrary => format!("lib{}.a", self.name),
    }
  }

  /// Whether this target links against the named dependency.
  pub fn uses_dependency(&self, name: &str) -> bool {
    self
      .dependencies
      .as_ref()
      .is_none_or(|names| names.iter().any(|n| n == name))
  }

  /// Fingerprint of everything that affects how a unit of this target compiles.
  pub fn compile_fingerprint(&self, include_dirs: &[PathBuf]) -> ContentHash {
    let includes = include_dirs.iter().map(|d| format!("-I{}", d.display()));
    hash_strings(
      std::iter::once(self.toolchain.compiler.clone())
        .chain(self.flags.compile.iter().cloned())
        .chain(includes),
    )
  }

  /// Fingerprint of the link (or archive) step, excluding its inputs.
  pub fn link_fingerprint(&self, libraries: &[PathBuf]) -> ContentHash {
    let kind = match self.kind {
      TargetKind::Executable => "executable",
      TargetKind::StaticLibrary => "staticlib",
    };
    let tool = match self.kind {
      TargetKind::Executable => &self.toolchain.linker,
      TargetKind::StaticLibrary => &self.toolchain.archiver,
    };
    hash_strings(
      [kind.to_string(), tool.clone()]
        .into_iter()
        .chain(self.flags.link.iter().cloned())
        .chain(libraries.iter().map(|l| l.display().to_string())),
    )
  }
}

/// An external dependency pinned to one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
  pub name: String,
  /// Git remote URL.
  pub url: String,
  /// Commit hash or tag as written in the project description.
  pub rev: String,
  /// CMake cache options (`-D<key>=<value>`).
  pub options: BTreeMap<String, String>,
  /// Extra configure arguments for this dependency only.
  pub cmake_flags: Vec<String>,
}

/// Executables for the dependency pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignTools {
  pub git: String,
  pub cmake: String,
}

impl Default for ForeignTools {
  fn default() -> Self {
    Self {
      git: std::env::var("JFB_GIT").unwrap_or_else(|_| "git".to_string()),
      cmake: std::env::var("JFB_CMAKE").unwrap_or_else(|_| "cmake".to_string()),
    }
  }
}

/// A fully resolved project.
#[derive(Debug, Clone)]
pub struct Project {
  pub name: String,
  /// Absolute project root.
  pub root: PathBuf,
  /// Absolute output directory for the selected profile.
  pub build_dir: PathBuf,
  pub profile: String,
  pub targets: Vec<Target>,
  pub dependencies: Vec<Dependency>,
  /// Flags passed to every dependency's CMake configure step; part of the cache identity.
  pub cmake_flags: Vec<String>,
  pub include_precedence: IncludePrecedence,
  pub compile_commands: bool,
  /// Worker pool size; `None` means available parallelism.
  pub jobs: Option<usize>,
  pub tools: ForeignTools,
  /// Path of the dependency pin file.
  pub lock_path: PathBuf,
}

impl Project {
  /// Output directory of one target.
  pub fn target_dir(&self, target: &Target) -> PathBuf {
    self.build_dir.join(&target.name)
  }

  /// Build record location of one target.
  pub fn record_path(&self, target: &Target) -> PathBuf {
    self.target_dir(target).join(RECORD_FILENAME)
  }

  /// Final artifact location of one target.
  pub fn artifact_path(&self, target: &Target) -> PathBuf {
    self.target_dir(target).join(target.artifact_name())
  }

  pub fn target(&self, name: &str) -> Option<&Target> {
    self.targets.iter().find(|t| t.name == name)
  }

  /// Effective worker pool size.
  pub fn parallelism(&self) -> usize {
    self
      .jobs
      .filter(|&j| j > 0)
      .unwrap_or_else(|| std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4))
  }
}
