use predicates::prelude::*;

use super::common::{BROKEN_CMAKE, FAKE_GIT, TestEnv};

const MAIN_C: &str = "#include \"util.h\"\nint main(void) { return UTIL; }\n";

fn hello_project() -> TestEnv {
  let env = TestEnv::c_project("");
  env.write_file("src/main.c", MAIN_C);
  env.write_file("include/util.h", "#define UTIL 0\n");
  env
}

#[test]
fn build_reports_counts() {
  let env = hello_project();

  env
    .jfb_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Built demo (debug)"))
    .stdout(predicate::str::contains("Compiled: 1"))
    .stdout(predicate::str::contains("Linked: 1"));

  assert!(env.path("build/debug/demo/demo").is_file());
}

#[test]
fn second_build_is_up_to_date() {
  let env = hello_project();
  env.jfb_cmd().arg("build").assert().success();

  env
    .jfb_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Compiled: 0"))
    .stdout(predicate::str::contains("Up to date: 1"))
    .stdout(predicate::str::contains("Linked: 0"));
}

#[test]
fn header_edit_recompiles() {
  let env = hello_project();
  env.jfb_cmd().arg("build").assert().success();

  env.write_file("include/util.h", "#define UTIL 1\n");
  env
    .jfb_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::contains("Compiled: 1"));
}

#[test]
fn compile_error_fails_with_diagnostics() {
  let env = TestEnv::c_project("");
  env.write_file("src/main.c", "int main(void) { syntax error }\n");

  env
    .jfb_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("error: expected ';'"))
    .stderr(predicate::str::contains("build failed"));
}

#[test]
fn release_profile_uses_its_own_directory() {
  let env = hello_project();

  env
    .jfb_cmd()
    .args(["build", "--profile", "release", "--jobs", "2"])
    .assert()
    .success()
    .stdout(predicate::str::contains("(release)"));

  assert!(env.path("build/release/demo/demo").is_file());
  assert!(!env.path("build/debug").exists());
}

#[test]
fn unknown_target_fails() {
  let env = hello_project();

  env
    .jfb_cmd()
    .args(["build", "--target", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown target 'nope'"));
}

#[test]
fn run_forwards_arguments_and_exit_code() {
  let env = hello_project();

  env
    .jfb_cmd()
    .args(["run", "--", "one", "two"])
    .assert()
    .code(7)
    .stdout(predicate::str::contains("hello from demo one two"));
}

#[test]
fn run_rejects_static_library() {
  let env = TestEnv::c_project("[target.util]\ntype = \"staticlib\"\n");
  env.write_file("src/util.c", "int util(void) { return 0; }\n");

  env
    .jfb_cmd()
    .arg("run")
    .assert()
    .failure()
    .stderr(predicate::str::contains("no executable target"));
}

#[test]
fn clean_removes_profile_outputs() {
  let env = hello_project();
  env.jfb_cmd().arg("build").assert().success();
  assert!(env.path("build/debug").is_dir());

  env
    .jfb_cmd()
    .arg("clean")
    .assert()
    .success()
    .stdout(predicate::str::contains("Removed"));
  assert!(!env.path("build/debug").exists());
  assert!(env.path("build").exists());

  env
    .jfb_cmd()
    .arg("clean")
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to clean"));
}

#[test]
fn clean_all_removes_every_profile() {
  let env = hello_project();
  env.jfb_cmd().arg("build").assert().success();
  env.jfb_cmd().args(["build", "-p", "release"]).assert().success();

  env.jfb_cmd().args(["clean", "--all"]).assert().success();
  assert!(!env.path("build").exists());
}

#[test]
fn every_failed_dependency_is_reported() {
  let env = TestEnv::c_project(
    r#"
[dependencies.zlib]
git = "https://example.com/madler/zlib.git"
tag = "v1.3.1"

[dependencies.libpng]
git = "https://example.com/glennrp/libpng.git"
tag = "v1.6.43"
"#,
  );
  env.write_file("src/main.c", "int main(void) { return 0; }\n");
  let git = env.install_tool("fake-git", FAKE_GIT);
  let cmake = env.install_tool("fake-cmake", BROKEN_CMAKE);

  env
    .jfb_cmd()
    .arg("build")
    .env("JFB_GIT", git)
    .env("JFB_CMAKE", cmake)
    .assert()
    .failure()
    .stderr(predicate::str::contains("failed to build dependency 'zlib'"))
    .stderr(predicate::str::contains("failed to build dependency 'libpng'"))
    .stderr(predicate::str::contains("2 dependencies failed"));
}

#[test]
fn missing_cmake_prints_hint() {
  let env = TestEnv::c_project(
    r#"
[dependencies.zlib]
git = "https://example.com/madler/zlib.git"
tag = "v1.3.1"
"#,
  );
  env.write_file("src/main.c", "int main(void) { return 0; }\n");
  let git = env.install_tool("fake-git", FAKE_GIT);

  env
    .jfb_cmd()
    .arg("build")
    .env("JFB_GIT", git)
    .env("JFB_CMAKE", env.temp.path().join("no-such-cmake"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("JFB_CMAKE"));
}
