use std::sync::Arc;
use std::time::Duration;

use jfb_lib::deps::cache::EntryStatus;
use jfb_lib::deps::{DependencyCache, EntrySource, LockFile};
use jfb_lib::engine::{BuildError, BuildOptions, Engine};
use tempfile::TempDir;
use tokio::task::JoinSet;

use super::common::{ScriptedRunner, TestProject, commit_for, engine, failed, world};

const ZLIB: &str = r#"
[dependencies.zlib]
git = "https://example.com/madler/zlib.git"
rev = "abc123"
options = { shared = false }
"#;

fn zlib_project(cache_toml: &str) -> TestProject {
  let env = TestProject::new(cache_toml);
  env.write("src/main.c", "#include <dep.h>\nint main(void) { return DEP; }\n");
  env
}

fn configures(runner: &ScriptedRunner) -> usize {
  runner.count("cmake", "-S")
}

#[tokio::test]
async fn dependency_is_fetched_built_and_spliced() {
  let env = zlib_project(ZLIB);
  let cache = TempDir::new().unwrap();
  let runner = Arc::new(ScriptedRunner::world());
  let project = env.project();

  let report = engine(&runner, cache.path())
    .build(&project, &BuildOptions::default())
    .await
    .unwrap();

  assert!(report.is_success());
  assert_eq!(report.dependencies_built(), 1);
  let dep = &report.dependencies[0];
  assert_eq!(dep.commit, commit_for("abc123"));

  let include = dep.manifest.include_dirs[0].display().to_string();
  let compile = &runner.compiles()[0];
  assert!(compile.args.contains(&format!("-I{include}")));

  let library = dep.manifest.libraries[0].display().to_string();
  assert!(runner.links()[0].args.contains(&library));

  let configure = runner.calls().into_iter().find(|c| c.program == "cmake").unwrap();
  assert!(configure.args.contains(&"-Dshared=false".to_string()));
  assert!(configure.args.contains(&"-DCMAKE_BUILD_TYPE=Debug".to_string()));
}

#[tokio::test]
async fn second_project_reuses_cache_without_cloning() {
  let cache = TempDir::new().unwrap();
  let first = zlib_project(ZLIB);
  let runner = Arc::new(ScriptedRunner::world());
  engine(&runner, cache.path())
    .build(&first.project(), &BuildOptions::default())
    .await
    .unwrap();
  assert_eq!(runner.count("git", "clone"), 2);

  let second = zlib_project(ZLIB);
  let other = Arc::new(ScriptedRunner::world());
  let report = engine(&other, cache.path())
    .build(&second.project(), &BuildOptions::default())
    .await
    .unwrap();

  assert!(report.is_success());
  assert_eq!(report.dependencies_cached(), 1);
  assert_eq!(other.count("git", "clone"), 0);
  assert_eq!(configures(&other), 0);
}

#[tokio::test]
async fn pinned_commit_skips_resolution() {
  let cache = TempDir::new().unwrap();
  let env = zlib_project(ZLIB);
  let runner = Arc::new(ScriptedRunner::world());
  let engine = engine(&runner, cache.path());
  let project = env.project();

  engine.build(&project, &BuildOptions::default()).await.unwrap();
  let lock = LockFile::load(&env.path("jfb.lock")).unwrap().unwrap();
  assert_eq!(lock.dependencies["zlib"].commit, commit_for("abc123"));

  runner.clear();
  let report = engine.build(&project, &BuildOptions::default()).await.unwrap();
  assert_eq!(report.actions(), 0);
  assert!(runner.calls().iter().all(|c| c.program != "git"));

  runner.clear();
  let refreshed = BuildOptions {
    refresh_lock: true,
    ..Default::default()
  };
  engine.build(&project, &refreshed).await.unwrap();
  assert_eq!(runner.count("git", "ls-remote"), 1);
}

#[tokio::test]
async fn tag_resolves_through_remote_refs() {
  let cache = TempDir::new().unwrap();
  let env = zlib_project(
    r#"
[dependencies.zlib]
git = "https://example.com/madler/zlib.git"
tag = "v1.3.1"
"#,
  );
  let runner = Arc::new(ScriptedRunner::world());

  let report = engine(&runner, cache.path())
    .build(&env.project(), &BuildOptions::default())
    .await
    .unwrap();

  assert_eq!(report.dependencies[0].commit, commit_for("v1.3.1"));
  let rev_parses = runner
    .calls()
    .iter()
    .filter(|c| c.args.iter().any(|a| a == "rev-parse"))
    .count();
  assert_eq!(rev_parses, 0);
}

#[tokio::test]
async fn option_change_creates_new_entry_and_keeps_old() {
  let cache = TempDir::new().unwrap();
  let runner = Arc::new(ScriptedRunner::world());

  let env = zlib_project(ZLIB);
  let first = engine(&runner, cache.path())
    .build(&env.project(), &BuildOptions::default())
    .await
    .unwrap();

  let shared = zlib_project(&ZLIB.replace("shared = false", "shared = true"));
  let second = engine(&runner, cache.path())
    .build(&shared.project(), &BuildOptions::default())
    .await
    .unwrap();

  let old = &first.dependencies[0];
  let new = &second.dependencies[0];
  assert_ne!(old.identity, new.identity);
  assert_eq!(new.source, EntrySource::Built);
  assert_eq!(configures(&runner), 2);

  let cache = DependencyCache::new(cache.path());
  assert_eq!(cache.lookup(&old.identity).unwrap().unwrap().status, EntryStatus::Built);
  assert!(old.manifest.libraries[0].is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_projects_build_dependency_once() {
  let cache = TempDir::new().unwrap();
  let runner = Arc::new(ScriptedRunner::world().with_delay(Duration::from_millis(20)));
  let projects: Vec<TestProject> = (0..4).map(|_| zlib_project(ZLIB)).collect();

  let mut tasks = JoinSet::new();
  for env in &projects {
    let project = env.project();
    // Separate cache handles share only the on-disk lock files.
    let engine = Engine::new(runner.clone(), Arc::new(DependencyCache::new(cache.path())));
    tasks.spawn(async move { engine.build(&project, &BuildOptions::default()).await.unwrap() });
  }

  let mut reports = Vec::new();
  while let Some(report) = tasks.join_next().await {
    reports.push(report.unwrap());
  }

  assert_eq!(configures(&runner), 1);
  assert!(reports.iter().all(|r| r.is_success()));
  let manifest = &reports[0].dependencies[0].manifest;
  assert!(reports.iter().all(|r| &r.dependencies[0].manifest == manifest));
  assert_eq!(reports.iter().map(|r| r.dependencies_built()).sum::<usize>(), 1);
}

#[tokio::test]
async fn fetch_failure_is_fatal() {
  let cache = TempDir::new().unwrap();
  let env = zlib_project(ZLIB);
  let runner = Arc::new(ScriptedRunner::new(|inv| {
    if inv.program == "git" && inv.args.iter().any(|a| a == "--shared") {
      failed(128, "fatal: unable to access remote")
    } else {
      world(inv)
    }
  }));

  let err = engine(&runner, cache.path())
    .build(&env.project(), &BuildOptions::default())
    .await
    .unwrap_err();

  match &err {
    BuildError::Resolve(resolve) => assert_eq!(resolve.dependency(), Some("zlib")),
    other => panic!("unexpected error: {other}"),
  }
  assert!(runner.compiles().is_empty());
  assert!(!env.path("jfb.lock").exists());
}

#[tokio::test]
async fn failed_foreign_build_is_retried_next_time() {
  let cache = TempDir::new().unwrap();
  let env = zlib_project(ZLIB);
  let broken = Arc::new(ScriptedRunner::new(|inv| {
    if inv.program == "cmake" && inv.args.first().map(String::as_str) == Some("--build") {
      failed(2, "zutil.c:42: error: boom")
    } else {
      world(inv)
    }
  }));

  let err = engine(&broken, cache.path())
    .build(&env.project(), &BuildOptions::default())
    .await
    .unwrap_err();
  assert!(err.to_string().contains("failed to build dependency 'zlib'"));

  let healthy = Arc::new(ScriptedRunner::world());
  let report = engine(&healthy, cache.path())
    .build(&env.project(), &BuildOptions::default())
    .await
    .unwrap();
  assert_eq!(report.dependencies_built(), 1);
  assert_eq!(configures(&healthy), 1);
}
