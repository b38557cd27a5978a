//! Shared helpers for library integration tests.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jfb_lib::config::Config;
use jfb_lib::deps::DependencyCache;
use jfb_lib::engine::Engine;
use jfb_lib::process::{Invocation, ProcessOutput, ProcessRunner};
use jfb_lib::project::{ForeignTools, Project};
use tempfile::TempDir;

type Handler = dyn Fn(&Invocation) -> io::Result<ProcessOutput> + Send + Sync;

/// Records every invocation and answers with a scripted handler.
pub struct ScriptedRunner {
  handler: Box<Handler>,
  delay: Duration,
  calls: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
  pub fn new(handler: impl Fn(&Invocation) -> io::Result<ProcessOutput> + Send + Sync + 'static) -> Self {
    Self {
      handler: Box::new(handler),
      delay: Duration::ZERO,
      calls: Mutex::new(Vec::new()),
    }
  }

  /// Compiler, archiver, git and cmake all emulated.
  pub fn world() -> Self {
    Self::new(world)
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> Vec<Invocation> {
    self.calls.lock().unwrap().clone()
  }

  /// Calls whose program and first argument match.
  pub fn count(&self, program: &str, first_arg: &str) -> usize {
    self
      .calls()
      .iter()
      .filter(|c| c.program == program && c.args.first().map(String::as_str) == Some(first_arg))
      .count()
  }

  /// Compile invocations (those carrying `-c`).
  pub fn compiles(&self) -> Vec<Invocation> {
    self
      .calls()
      .into_iter()
      .filter(|c| c.args.iter().any(|a| a == "-c"))
      .collect()
  }

  /// Link invocations (compiler driver without `-c`).
  pub fn links(&self) -> Vec<Invocation> {
    self
      .calls()
      .into_iter()
      .filter(|c| c.program == "cc" && !c.args.iter().any(|a| a == "-c"))
      .collect()
  }

  pub fn clear(&self) {
    self.calls.lock().unwrap().clear();
  }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
  async fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
    self.calls.lock().unwrap().push(invocation.clone());
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    (self.handler)(invocation)
  }
}

pub fn ok() -> io::Result<ProcessOutput> {
  Ok(ProcessOutput {
    code: Some(0),
    ..Default::default()
  })
}

pub fn stdout(text: String) -> io::Result<ProcessOutput> {
  Ok(ProcessOutput {
    code: Some(0),
    stdout: text,
    stderr: String::new(),
  })
}

pub fn failed(code: i32, stderr: &str) -> io::Result<ProcessOutput> {
  Ok(ProcessOutput {
    code: Some(code),
    stdout: String::new(),
    stderr: stderr.to_string(),
  })
}

fn arg_after(invocation: &Invocation, flag: &str) -> Option<PathBuf> {
  invocation
    .args
    .iter()
    .position(|a| a == flag)
    .and_then(|i| invocation.args.get(i + 1))
    .map(PathBuf::from)
}

/// Commit a revision resolves to: tags through the remote, anything else padded to 40.
pub fn commit_for(rev: &str) -> String {
  format!("{:0<40}", rev.trim_start_matches('v').replace('.', ""))
}

/// Emulates every external tool by program name.
pub fn world(invocation: &Invocation) -> io::Result<ProcessOutput> {
  match invocation.program.as_str() {
    "git" => git(invocation),
    "cmake" => cmake(invocation),
    "ar" => {
      let mut content = Vec::new();
      for input in &invocation.args[2..] {
        content.extend(fs::read(input)?);
      }
      fs::write(&invocation.args[1], content)?;
      ok()
    }
    _ => compiler(invocation),
  }
}

fn compiler(invocation: &Invocation) -> io::Result<ProcessOutput> {
  let Some(out) = arg_after(invocation, "-o") else {
    return failed(1, "no output file");
  };

  if let Some(source) = arg_after(invocation, "-c") {
    let text = fs::read_to_string(&source)?;
    if text.contains("syntax error") {
      let name = source.file_name().unwrap_or_default().to_string_lossy().into_owned();
      return failed(1, &format!("{name}:1:5: error: expected ';' before '}}' token"));
    }
    fs::write(out, format!("OBJ[{}]{}", invocation.args.join(" "), text))?;
    return ok();
  }

  let mut content = Vec::new();
  for input in invocation.args.iter().filter(|a| a.ends_with(".o") || a.ends_with(".a")) {
    content.extend(fs::read(input)?);
  }
  fs::write(out, content)?;
  ok()
}

fn git(invocation: &Invocation) -> io::Result<ProcessOutput> {
  let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
  match args.as_slice() {
    ["ls-remote", _, rev] if rev.starts_with('v') => stdout(format!("{}\trefs/tags/{rev}\n", commit_for(rev))),
    ["ls-remote", ..] => stdout(String::new()),
    ["clone", "--mirror", _, dest] => {
      fs::create_dir_all(dest)?;
      fs::write(Path::new(dest).join("HEAD"), "ref: refs/heads/main\n")?;
      ok()
    }
    ["clone", "--shared", "--no-checkout", _, dest] => {
      fs::create_dir_all(dest)?;
      fs::write(Path::new(dest).join("CMakeLists.txt"), "project(dep C)\n")?;
      ok()
    }
    ["-C", _, "rev-parse", _, _, rev] => stdout(format!("{}\n", commit_for(rev.trim_end_matches("^{commit}")))),
    _ => ok(),
  }
}

fn cmake(invocation: &Invocation) -> io::Result<ProcessOutput> {
  if invocation.args.first().map(String::as_str) == Some("--install") {
    let prefix = arg_after(invocation, "--prefix").ok_or_else(|| io::Error::other("no prefix"))?;
    fs::create_dir_all(prefix.join("include"))?;
    fs::create_dir_all(prefix.join("lib"))?;
    fs::write(prefix.join("include/dep.h"), "#define DEP 1\n")?;
    fs::write(prefix.join("lib/libdep.a"), "LIBDEP")?;
  }
  ok()
}

/// A project directory with its own `jfb.toml`.
pub struct TestProject {
  pub temp: TempDir,
  pub root: PathBuf,
}

impl TestProject {
  /// A C project with the given `jfb.toml` body appended to a pinned toolchain.
  pub fn new(extra_toml: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap().join("proj");
    fs::create_dir_all(&root).unwrap();
    let toml = format!(
      "[workspace]\nname = \"demo\"\n\n[build]\nc_compiler = \"cc\"\narchiver = \"ar\"\njobs = 8\n\n{extra_toml}"
    );
    fs::write(root.join("jfb.toml"), toml).unwrap();
    Self { temp, root }
  }

  pub fn write(&self, rel: &str, content: &str) {
    let path = self.root.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
  }

  pub fn remove(&self, rel: &str) {
    fs::remove_file(self.root.join(rel)).unwrap();
  }

  pub fn path(&self, rel: &str) -> PathBuf {
    self.root.join(rel)
  }

  pub fn project(&self) -> Project {
    let config = Config::load(&self.root.join("jfb.toml")).unwrap();
    let mut project = config.into_project(&self.root, "debug").unwrap();
    project.tools = ForeignTools {
      git: "git".to_string(),
      cmake: "cmake".to_string(),
    };
    project
  }
}

/// An engine over `runner` with a cache rooted at `cache`.
pub fn engine(runner: &Arc<ScriptedRunner>, cache: &Path) -> Engine {
  Engine::new(runner.clone(), Arc::new(DependencyCache::new(cache)))
}
