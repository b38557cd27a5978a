//! `jfb.toml` parsing.
//!
//! The file is deserialized into [`Config`] and then flattened by [`Config::into_project`]
//! into the [`Project`] the engine consumes. Flattening applies, in order:
//! the `[build]` table, the selected `[profile.*]`, and the per-target `[target.*.build]`
//! overrides. Tools not named anywhere fall back to `CC`, `CXX` and `AR`.
//!
//! ```toml
//! [workspace]
//! name = "demo"
//!
//! [build]
//! warnings = ["all", "extra"]
//! compile_commands = true
//!
//! [target.demo]
//! type = "executable"
//! source_dirs = ["src"]
//!
//! [dependencies.zlib]
//! git = "https://github.com/madler/zlib.git"
//! tag = "v1.3.1"
//! options = { ZLIB_BUILD_EXAMPLES = false }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{CONFIG_FILENAME, LOCK_FILENAME};
use crate::project::{
  Dependency, FlagSet, ForeignTools, IncludePrecedence, Language, Project, Target, TargetKind, Toolchain,
};

/// Errors raised while loading or flattening `jfb.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse configuration: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("missing required field: {0}")]
  MissingField(String),

  #[error("unknown profile '{0}'")]
  UnknownProfile(String),

  #[error("target '{target}' uses undeclared dependency '{dependency}'")]
  UnknownDependency { target: String, dependency: String },

  #[error("dependency '{0}' must set exactly one of `rev` or `tag`")]
  InvalidRevision(String),

  #[error("dependency '{dependency}' option '{key}' must be a string, number or boolean")]
  InvalidOption { dependency: String, key: String },
}

/// Root of `jfb.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
  pub workspace: WorkspaceConfig,

  #[serde(default)]
  pub build: BuildConfig,

  #[serde(default, rename = "profile")]
  pub profiles: BTreeMap<String, ProfileConfig>,

  #[serde(default, rename = "target")]
  pub targets: BTreeMap<String, TargetConfig>,

  #[serde(default)]
  pub dependencies: BTreeMap<String, DependencyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
  pub name: String,
  #[serde(default = "default_build_dir")]
  pub build_dir: PathBuf,
}

impl Default for WorkspaceConfig {
  fn default() -> Self {
    Self {
      name: String::new(),
      build_dir: default_build_dir(),
    }
  }
}

fn default_build_dir() -> PathBuf {
  PathBuf::from("build")
}

/// Project-wide compiler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
  /// Optimization level (`0`, `1`, `2`, `3`, `s`, `z`).
  pub opt_level: Option<String>,
  pub c_compiler: Option<String>,
  pub cpp_compiler: Option<String>,
  pub c_standard: Option<String>,
  pub cpp_standard: Option<String>,
  pub linker: Option<String>,
  pub archiver: Option<String>,
  pub debug: Option<bool>,
  pub warnings_as_errors: bool,
  /// Warning names, passed as `-W<name>`.
  pub warnings: Vec<String>,
  pub flags: Vec<String>,
  pub link_flags: Vec<String>,
  /// Preprocessor defines, passed as `-D<define>`.
  pub defines: Vec<String>,
  pub jobs: Option<usize>,
  pub include_precedence: IncludePrecedence,
  pub compile_commands: bool,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      opt_level: None,
      c_compiler: None,
      cpp_compiler: None,
      c_standard: None,
      cpp_standard: None,
      linker: None,
      archiver: None,
      debug: None,
      warnings_as_errors: false,
      warnings: vec!["all".to_string(), "extra".to_string()],
      flags: Vec::new(),
      link_flags: Vec::new(),
      defines: Vec::new(),
      jobs: None,
      include_precedence: IncludePrecedence::Project,
      compile_commands: false,
    }
  }
}

/// A named profile. `debug` and `release` exist implicitly and may be overridden.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
  pub opt_level: Option<String>,
  pub debug: Option<bool>,
  /// Appended to `[build].defines`.
  pub defines: Vec<String>,
  /// Appended to `[build].flags`.
  pub flags: Vec<String>,
  /// Configure arguments for every dependency built under this profile.
  pub cmake_flags: Vec<String>,
}

impl ProfileConfig {
  fn builtin(name: &str) -> Option<Self> {
    match name {
      "debug" => Some(Self {
        opt_level: Some("0".to_string()),
        debug: Some(true),
        cmake_flags: vec!["-DCMAKE_BUILD_TYPE=Debug".to_string()],
        ..Default::default()
      }),
      "release" => Some(Self {
        opt_level: Some("3".to_string()),
        debug: Some(false),
        cmake_flags: vec!["-DCMAKE_BUILD_TYPE=Release".to_string()],
        ..Default::default()
      }),
      _ => None,
    }
  }

  /// Layer an explicit profile table over a builtin one.
  fn layered(self, over: &ProfileConfig) -> Self {
    Self {
      opt_level: over.opt_level.clone().or(self.opt_level),
      debug: over.debug.or(self.debug),
      defines: [self.defines, over.defines.clone()].concat(),
      flags: [self.flags, over.flags.clone()].concat(),
      cmake_flags: if over.cmake_flags.is_empty() {
        self.cmake_flags
      } else {
        over.cmake_flags.clone()
      },
    }
  }
}

/// Per-target overrides of [`BuildConfig`]; every set field replaces the project value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOverrides {
  pub opt_level: Option<String>,
  pub c_compiler: Option<String>,
  pub cpp_compiler: Option<String>,
  pub c_standard: Option<String>,
  pub cpp_standard: Option<String>,
  pub linker: Option<String>,
  pub archiver: Option<String>,
  pub debug: Option<bool>,
  pub warnings_as_errors: Option<bool>,
  pub warnings: Option<Vec<String>>,
  pub flags: Option<Vec<String>>,
  pub link_flags: Option<Vec<String>>,
  pub defines: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
  #[serde(rename = "type")]
  pub kind: TargetKind,
  pub language: Language,
  pub source_dirs: Vec<PathBuf>,
  pub include_dirs: Vec<PathBuf>,
  /// Dependency names this target consumes; all declared dependencies when unset.
  pub dependencies: Option<Vec<String>>,
  #[serde(rename = "build")]
  pub overrides: Option<BuildOverrides>,
}

impl Default for TargetConfig {
  fn default() -> Self {
    Self {
      kind: TargetKind::Executable,
      language: Language::C,
      source_dirs: vec![PathBuf::from("src")],
      include_dirs: vec![PathBuf::from("include")],
      dependencies: None,
      overrides: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
  pub git: String,
  pub rev: Option<String>,
  pub tag: Option<String>,
  #[serde(default)]
  pub options: BTreeMap<String, toml::Value>,
  #[serde(default)]
  pub cmake_flags: Vec<String>,
}

impl DependencyConfig {
  fn into_dependency(self, name: &str) -> Result<Dependency, ConfigError> {
    let rev = match (self.rev, self.tag) {
      (Some(rev), None) | (None, Some(rev)) => rev,
      _ => return Err(ConfigError::InvalidRevision(name.to_string())),
    };

    let mut options = BTreeMap::new();
    for (key, value) in self.options {
      let value = match value {
        toml::Value::String(s) => s,
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        _ => {
          return Err(ConfigError::InvalidOption {
            dependency: name.to_string(),
            key,
          });
        }
      };
      options.insert(key, value);
    }

    Ok(Dependency {
      name: name.to_string(),
      url: self.git,
      rev,
      options,
      cmake_flags: self.cmake_flags,
    })
  }
}

impl Config {
  /// Load configuration from a TOML file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(&content)
  }

  /// Parse and validate configuration text.
  pub fn parse(content: &str) -> Result<Self, ConfigError> {
    let config: Config = toml::from_str(content)?;
    if config.workspace.name.trim().is_empty() {
      return Err(ConfigError::MissingField("workspace.name".to_string()));
    }
    Ok(config)
  }

  /// Flatten into a [`Project`] rooted at `root` for the named profile.
  pub fn into_project(self, root: &Path, profile: &str) -> Result<Project, ConfigError> {
    let profile_config = match (ProfileConfig::builtin(profile), self.profiles.get(profile)) {
      (Some(builtin), Some(explicit)) => builtin.layered(explicit),
      (Some(builtin), None) => builtin,
      (None, Some(explicit)) => explicit.clone(),
      (None, None) => return Err(ConfigError::UnknownProfile(profile.to_string())),
    };

    let mut dependencies = Vec::with_capacity(self.dependencies.len());
    for (name, dep) in self.dependencies {
      dependencies.push(dep.into_dependency(&name)?);
    }

    let mut target_configs = self.targets;
    if target_configs.is_empty() {
      target_configs.insert(self.workspace.name.clone(), TargetConfig::default());
    }

    let mut targets = Vec::with_capacity(target_configs.len());
    for (name, target) in target_configs {
      if let Some(used) = &target.dependencies
        && let Some(missing) = used.iter().find(|u| !dependencies.iter().any(|d| &d.name == *u))
      {
        return Err(ConfigError::UnknownDependency {
          target: name,
          dependency: missing.clone(),
        });
      }
      targets.push(flatten_target(root, &name, target, &self.build, &profile_config));
    }

    let build_dir = root.join(&self.workspace.build_dir).join(profile);
    debug!(project = %self.workspace.name, profile, targets = targets.len(), "configuration flattened");

    Ok(Project {
      name: self.workspace.name,
      root: root.to_path_buf(),
      build_dir,
      profile: profile.to_string(),
      targets,
      dependencies,
      cmake_flags: profile_config.cmake_flags,
      include_precedence: self.build.include_precedence,
      compile_commands: self.build.compile_commands,
      jobs: self.build.jobs,
      tools: ForeignTools::default(),
      lock_path: root.join(LOCK_FILENAME),
    })
  }
}

/// Locate `jfb.toml` given either the file itself or its directory.
pub fn config_path(path: &Path) -> PathBuf {
  if path.is_dir() {
    path.join(CONFIG_FILENAME)
  } else {
    path.to_path_buf()
  }
}

fn env_tool(var: &str, default: &str) -> String {
  std::env::var(var)
    .ok()
    .filter(|v| !v.trim().is_empty())
    .unwrap_or_else(|| default.to_string())
}

fn flatten_target(
  root: &Path,
  name: &str,
  target: TargetConfig,
  build: &BuildConfig,
  profile: &ProfileConfig,
) -> Target {
  let o = target.overrides.unwrap_or_default();

  let compiler = match target.language {
    Language::C => o
      .c_compiler
      .or_else(|| build.c_compiler.clone())
      .unwrap_or_else(|| env_tool("CC", "cc")),
    Language::Cpp => o
      .cpp_compiler
      .or_else(|| build.cpp_compiler.clone())
      .unwrap_or_else(|| env_tool("CXX", "c++")),
  };
  let linker = o
    .linker
    .or_else(|| build.linker.clone())
    .unwrap_or_else(|| compiler.clone());
  let archiver = o
    .archiver
    .or_else(|| build.archiver.clone())
    .unwrap_or_else(|| env_tool("AR", "ar"));

  let opt_level = o
    .opt_level
    .or_else(|| profile.opt_level.clone())
    .or_else(|| build.opt_level.clone())
    .unwrap_or_else(|| "0".to_string());
  let debug = o.debug.or(profile.debug).or(build.debug).unwrap_or(true);
  let standard = match target.language {
    Language::C => o.c_standard.or_else(|| build.c_standard.clone()),
    Language::Cpp => o.cpp_standard.or_else(|| build.cpp_standard.clone()),
  };
  let warnings = o.warnings.unwrap_or_else(|| build.warnings.clone());
  let werror = o.warnings_as_errors.unwrap_or(build.warnings_as_errors);
  let defines = o
    .defines
    .unwrap_or_else(|| [build.defines.clone(), profile.defines.clone()].concat());
  let extra = o
    .flags
    .unwrap_or_else(|| [build.flags.clone(), profile.flags.clone()].concat());

  let mut compile = vec![format!("-O{opt_level}")];
  if debug {
    compile.push("-g".to_string());
  }
  if let Some(std) = standard {
    compile.push(format!("-std={std}"));
  }
  compile.extend(warnings.iter().map(|w| format!("-W{w}")));
  if werror {
    compile.push("-Werror".to_string());
  }
  compile.extend(defines.iter().map(|d| format!("-D{d}")));
  compile.extend(extra);

  let link = o.link_flags.unwrap_or_else(|| build.link_flags.clone());

  Target {
    name: name.to_string(),
    kind: target.kind,
    language: target.language,
    source_dirs: target.source_dirs.iter().map(|d| root.join(d)).collect(),
    include_dirs: target.include_dirs.iter().map(|d| root.join(d)).collect(),
    dependencies: target.dependencies,
    toolchain: Toolchain {
      compiler,
      linker,
      archiver,
    },
    flags: FlagSet { compile, link },
  }
}
