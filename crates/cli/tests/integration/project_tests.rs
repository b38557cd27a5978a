use predicates::prelude::*;

use super::common::TestEnv;

const EMPTY_WORKSPACE: &str = "[workspace]\nname = \"demo\"\n";

#[test]
fn missing_project_file_fails() {
  let env = TestEnv::empty();

  env
    .jfb_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to find project file"));
}

#[test]
fn config_flag_accepts_file_path() {
  let env = TestEnv::with_config(EMPTY_WORKSPACE);
  let other = TestEnv::empty();

  other
    .jfb_cmd()
    .arg("deps")
    .arg("--config")
    .arg(env.path("jfb.toml"))
    .assert()
    .success()
    .stdout(predicate::str::contains("No dependencies declared"));
}

#[test]
fn malformed_project_file_fails() {
  let env = TestEnv::with_config("[workspace\nname = ");

  env
    .jfb_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load"));
}

#[test]
fn unknown_profile_fails() {
  let env = TestEnv::with_config(EMPTY_WORKSPACE);

  env
    .jfb_cmd()
    .args(["build", "--profile", "fastest"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("fastest"));
}

#[test]
fn empty_target_fails() {
  let env = TestEnv::with_config(EMPTY_WORKSPACE);

  env
    .jfb_cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("no compilation units"));
}

#[test]
fn deps_json_without_dependencies_is_empty_list() {
  let env = TestEnv::with_config(EMPTY_WORKSPACE);

  let output = env.jfb_cmd().args(["deps", "-o", "json"]).output().unwrap();
  assert!(output.status.success());
  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(value, serde_json::json!([]));
}

#[test]
fn update_without_dependencies_is_noop() {
  let env = TestEnv::with_config(EMPTY_WORKSPACE);

  env
    .jfb_cmd()
    .arg("update")
    .assert()
    .success()
    .stdout(predicate::str::contains("No dependencies declared"));
  assert!(!env.path("jfb.lock").exists());
}
