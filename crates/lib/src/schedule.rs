//! Bounded parallel dispatch of compile actions.
//!
//! Compile-units are mutually independent, so every stale unit is dispatched to a
//! worker pool bounded by a semaphore. The first failure raises a halt flag: actions
//! already running finish, nothing new is dispatched, and the undispatched units are
//! reported so the caller can skip the link.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::process::ProcessRunner;
use crate::toolchain::{CompileRequest, InvokeError, compile};
use crate::util::hash::ContentHash;

/// One compile action, owned so it can move into a worker task.
#[derive(Debug, Clone)]
pub struct CompileJob {
  pub source: PathBuf,
  pub output: PathBuf,
  pub compiler: String,
  pub flags: Arc<[String]>,
  pub include_dirs: Arc<[PathBuf]>,
}

impl CompileJob {
  pub fn request(&self) -> CompileRequest<'_> {
    CompileRequest {
      compiler: &self.compiler,
      flags: &self.flags,
      include_dirs: &self.include_dirs,
      source: &self.source,
      output: &self.output,
    }
  }
}

/// Result of dispatching a batch of compile jobs.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
  /// Source → hash of the object it produced.
  pub compiled: BTreeMap<PathBuf, ContentHash>,
  /// Every failed action, tagged with its source, in path order.
  pub failed: Vec<(PathBuf, InvokeError)>,
  /// Jobs never started because dispatch halted.
  pub not_dispatched: Vec<PathBuf>,
}

impl ScheduleOutcome {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.not_dispatched.is_empty()
  }

  /// The first failure that makes the rest of the build pointless.
  pub fn fatal(&self) -> Option<&InvokeError> {
    self.failed.iter().map(|(_, e)| e).find(|e| e.is_fatal())
  }
}

/// Run `jobs` on at most `parallelism` concurrent workers.
pub async fn run_compiles(runner: Arc<dyn ProcessRunner>, jobs: Vec<CompileJob>, parallelism: usize) -> ScheduleOutcome {
  let parallelism = parallelism.max(1);
  info!(jobs = jobs.len(), parallelism, "dispatching compile actions");

  let semaphore = Arc::new(Semaphore::new(parallelism));
  let halt = Arc::new(AtomicBool::new(false));
  let mut join_set = JoinSet::new();
  let mut in_flight: HashSet<PathBuf> = HashSet::new();
  let mut outcome = ScheduleOutcome::default();

  let mut pending = jobs.into_iter();
  while let Some(job) = pending.next() {
    let permit = match semaphore.clone().acquire_owned().await {
      Ok(permit) => permit,
      Err(_) => {
        outcome.not_dispatched.push(job.source);
        continue;
      }
    };
    if halt.load(Ordering::SeqCst) {
      drop(permit);
      outcome.not_dispatched.push(job.source);
      outcome.not_dispatched.extend(pending.by_ref().map(|j| j.source));
      break;
    }

    debug!(source = %job.source.display(), "dispatch");
    in_flight.insert(job.source.clone());
    let runner = runner.clone();
    let halt = halt.clone();
    join_set.spawn(async move {
      let result = compile(runner.as_ref(), &job.request()).await;
      if result.is_err() {
        halt.store(true, Ordering::SeqCst);
      }
      drop(permit);
      (job.source, result)
    });
  }

  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((source, Ok(hash))) => {
        in_flight.remove(&source);
        outcome.compiled.insert(source, hash);
      }
      Ok((source, Err(e))) => {
        in_flight.remove(&source);
        error!(source = %source.display(), error = %e, "compile failed");
        outcome.failed.push((source, e));
      }
      Err(e) => {
        error!(error = %e, "compile task panicked");
        halt.store(true, Ordering::SeqCst);
      }
    }
  }

  // Whatever is still in flight belongs to a task that panicked.
  for source in in_flight {
    outcome.failed.push((
      source.clone(),
      InvokeError::Aborted {
        node: source,
        reason: "worker task panicked".to_string(),
      },
    ));
  }

  outcome.failed.sort_by(|a, b| a.0.cmp(&b.0));
  if !outcome.not_dispatched.is_empty() {
    warn!(count = outcome.not_dispatched.len(), "compile actions not dispatched after failure");
  }
  outcome
}
