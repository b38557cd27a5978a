//! Test utilities for jfb-lib.
//!
//! Cross-platform shell helpers plus [`FakeRunner`], a scripted [`ProcessRunner`]
//! that records every invocation and emulates a C toolchain.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::process::{Invocation, ProcessOutput, ProcessRunner};

/// Returns the command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}

type Handler = dyn Fn(&Invocation) -> io::Result<ProcessOutput> + Send + Sync;
type DelayFn = dyn Fn(&Invocation) -> Duration + Send + Sync;

/// A scripted process runner.
pub struct FakeRunner {
  handler: Box<Handler>,
  delay: Box<DelayFn>,
  calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
  pub fn new(handler: impl Fn(&Invocation) -> io::Result<ProcessOutput> + Send + Sync + 'static) -> Self {
    Self {
      handler: Box::new(handler),
      delay: Box::new(|_| Duration::ZERO),
      calls: Mutex::new(Vec::new()),
    }
  }

  /// A runner that emulates `cc`/`ar` via [`fake_toolchain`].
  pub fn toolchain() -> Self {
    Self::new(fake_toolchain)
  }

  /// Sleep before answering every call, simulating a slow tool.
  pub fn with_delay(self, delay: Duration) -> Self {
    self.with_delay_fn(move |_| delay)
  }

  pub fn with_delay_fn(mut self, delay: impl Fn(&Invocation) -> Duration + Send + Sync + 'static) -> Self {
    self.delay = Box::new(delay);
    self
  }

  pub fn calls(&self) -> Vec<Invocation> {
    self.calls.lock().unwrap().clone()
  }

  pub fn calls_to(&self, program: &str) -> usize {
    self.calls().iter().filter(|c| c.program == program).count()
  }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
  async fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
    self.calls.lock().unwrap().push(invocation.clone());
    let delay = (self.delay)(invocation);
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
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

pub fn failed(code: i32, stderr: &str) -> io::Result<ProcessOutput> {
  Ok(ProcessOutput {
    code: Some(code),
    stdout: String::new(),
    stderr: stderr.to_string(),
  })
}

pub fn not_found(program: &str) -> io::Result<ProcessOutput> {
  Err(io::Error::new(io::ErrorKind::NotFound, format!("{program}: not found")))
}

/// The value following `-o`, if any.
pub fn output_arg(invocation: &Invocation) -> Option<PathBuf> {
  invocation
    .args
    .iter()
    .position(|a| a == "-o")
    .and_then(|i| invocation.args.get(i + 1))
    .map(PathBuf::from)
}

/// Emulates a compiler driver and archiver.
///
/// - `-c <src> -o <obj>` writes an object derived from the source bytes; a source
///   containing `syntax error` fails with a compiler-style diagnostic.
/// - `ar rcs <out> <objs..>` and a link `-o <out>` concatenate their inputs.
pub fn fake_toolchain(invocation: &Invocation) -> io::Result<ProcessOutput> {
  if invocation.program == "ar" {
    let out = PathBuf::from(&invocation.args[1]);
    let mut content = Vec::new();
    for input in &invocation.args[2..] {
      content.extend(fs::read(input)?);
    }
    fs::write(out, content)?;
    return ok();
  }

  let Some(out) = output_arg(invocation) else {
    return failed(1, "no output file");
  };

  if let Some(i) = invocation.args.iter().position(|a| a == "-c") {
    let source = Path::new(&invocation.args[i + 1]);
    let text = fs::read_to_string(source)?;
    if text.contains("syntax error") {
      let name = source.file_name().unwrap_or_default().to_string_lossy();
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

/// Commit every fake remote ref resolves to.
pub const FAKE_COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

/// Emulates `git`: every ref resolves to [`FAKE_COMMIT`] and clones create the
/// directories a real clone would.
pub fn fake_git(invocation: &Invocation) -> io::Result<ProcessOutput> {
  let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
  match args.as_slice() {
    ["ls-remote", _, rev] => Ok(ProcessOutput {
      code: Some(0),
      stdout: format!("{FAKE_COMMIT}\trefs/tags/{rev}\n"),
      stderr: String::new(),
    }),
    ["clone", "--mirror", _, dest] => {
      fs::create_dir_all(dest)?;
      fs::write(Path::new(dest).join("HEAD"), "ref: refs/heads/main\n")?;
      ok()
    }
    ["clone", "--shared", "--no-checkout", _, dest] => {
      fs::create_dir_all(dest)?;
      fs::write(Path::new(dest).join("CMakeLists.txt"), "project(fake C)\n")?;
      ok()
    }
    ["-C", _, "rev-parse", ..] => Ok(ProcessOutput {
      code: Some(0),
      stdout: format!("{FAKE_COMMIT}\n"),
      stderr: String::new(),
    }),
    _ => ok(),
  }
}

/// Emulates `cmake`: install writes `include/dep.h` and `lib/libdep.a` under the prefix.
pub fn fake_cmake(invocation: &Invocation) -> io::Result<ProcessOutput> {
  if invocation.args.first().map(String::as_str) == Some("--install") {
    let prefix = invocation
      .args
      .iter()
      .position(|a| a == "--prefix")
      .and_then(|i| invocation.args.get(i + 1))
      .map(PathBuf::from)
      .ok_or_else(|| io::Error::other("install without --prefix"))?;
    fs::create_dir_all(prefix.join("include"))?;
    fs::create_dir_all(prefix.join("lib"))?;
    fs::write(prefix.join("include/dep.h"), "#define DEP 1\n")?;
    fs::write(prefix.join("lib/libdep.a"), "LIBDEP")?;
  }
  ok()
}

/// Dispatches to [`fake_git`], [`fake_cmake`] or [`fake_toolchain`] by program name.
pub fn fake_world(invocation: &Invocation) -> io::Result<ProcessOutput> {
  match invocation.program.as_str() {
    "git" => fake_git(invocation),
    "cmake" => fake_cmake(invocation),
    _ => fake_toolchain(invocation),
  }
}
