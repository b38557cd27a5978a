//! Shared test helpers for CLI integration tests.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Compiles by copying the source, links by writing a shell script that echoes
/// its arguments and exits 7. Sources containing "syntax error" fail to compile.
#[cfg(unix)]
const FAKE_CC: &str = r#"#!/bin/sh
out=""
src=""
prev=""
for arg in "$@"; do
  case "$prev" in
    -o) out="$arg" ;;
    -c) src="$arg" ;;
  esac
  prev="$arg"
done
if [ -n "$src" ]; then
  if grep -q "syntax error" "$src"; then
    echo "$src:1:17: error: expected ';' before '}' token" >&2
    exit 1
  fi
  cp "$src" "$out"
  exit 0
fi
printf '#!/bin/sh\necho "hello from demo $*"\nexit 7\n' > "$out"
chmod +x "$out"
"#;

/// Answers `ls-remote` with a fixed commit and creates clone destinations.
#[cfg(unix)]
pub const FAKE_GIT: &str = r#"#!/bin/sh
case "$1" in
  ls-remote) printf '0123456789abcdef0123456789abcdef01234567\trefs/tags/%s\n' "$3" ;;
  clone) for last; do :; done; mkdir -p "$last" && touch "$last/HEAD" ;;
esac
exit 0
"#;

/// Configures and installs successfully but fails every `--build`.
#[cfg(unix)]
pub const BROKEN_CMAKE: &str = r#"#!/bin/sh
if [ "$1" = "--build" ]; then
  echo "error: dependency does not compile" >&2
  exit 2
fi
exit 0
"#;

/// Isolated project directory with its own dependency cache.
pub struct TestEnv {
  pub temp: TempDir,
  pub root: PathBuf,
}

impl TestEnv {
  /// An empty project directory without `jfb.toml`.
  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap().join("proj");
    fs::create_dir_all(&root).unwrap();
    Self { temp, root }
  }

  /// A project whose `jfb.toml` carries `toml` verbatim.
  pub fn with_config(toml: &str) -> Self {
    let env = Self::empty();
    env.write_file("jfb.toml", toml);
    env
  }

  /// A C project compiled by the fake compiler, with `extra_toml` appended.
  #[cfg(unix)]
  pub fn c_project(extra_toml: &str) -> Self {
    let env = Self::empty();
    let cc = env.install_tool("fake-cc", FAKE_CC);

    let toml = format!(
      "[workspace]\nname = \"demo\"\n\n[build]\nc_compiler = \"{}\"\n\n{extra_toml}",
      cc.display()
    );
    env.write_file("jfb.toml", &toml);
    env
  }

  /// Write an executable script into the temp directory and return its path.
  #[cfg(unix)]
  pub fn install_tool(&self, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = self.temp.path().join(name);
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  /// Write a file relative to the project root.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.root.join(relative_path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.root.join(relative_path)
  }

  /// Get a pre-configured Command for the jfb binary.
  ///
  /// Runs inside the project root with the dependency cache redirected into the
  /// temp directory.
  pub fn jfb_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("jfb");
    cmd.current_dir(&self.root);
    cmd.env("JFB_CACHE_DIR", self.temp.path().join("cache"));
    cmd.env_remove("JFB_LOG");
    cmd
  }
}
