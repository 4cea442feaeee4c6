//! The worker-pool seam.
//!
//! The scheduler never runs work itself. It hands fully wrapped jobs to an
//! [`Executor`], which only has to run them to completion in the background.
//! Admission control lives entirely in the scheduler, so any executor can be
//! substituted regardless of how it sizes its own pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::runtime::Handle as TokioHandle;

/// A dispatched unit of work. Outcome reporting is built into the job itself.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The executor refused to accept a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("executor rejected job: {reason}")]
pub struct ExecutorRejected {
  pub reason: String,
}

impl ExecutorRejected {
  pub fn new(reason: impl Into<String>) -> Self {
    Self { reason: reason.into() }
  }
}

/// Anything capable of running a job asynchronously.
///
/// `execute` must not block waiting for the job. A rejected job is returned to
/// nobody: the scheduler resolves the task as unavailable.
pub trait Executor: Send + Sync + 'static {
  fn execute(&self, job: Job) -> Result<(), ExecutorRejected>;

  /// Releases the pool. Called once by the scheduler after its last task has
  /// finished. Jobs submitted afterwards should be rejected.
  fn shutdown(&self) {}
}

/// Runs jobs on a Tokio runtime.
#[derive(Debug)]
pub struct TokioExecutor {
  handle: TokioHandle,
  closed: AtomicBool,
}

impl TokioExecutor {
  pub fn new(handle: TokioHandle) -> Self {
    Self {
      handle,
      closed: AtomicBool::new(false),
    }
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }
}

impl Executor for TokioExecutor {
  fn execute(&self, job: Job) -> Result<(), ExecutorRejected> {
    if self.is_closed() {
      return Err(ExecutorRejected::new("tokio executor has been shut down"));
    }
    // Dropping the JoinHandle detaches the job; completion is reported by the job.
    let _ = self.handle.spawn(job);
    Ok(())
  }

  fn shutdown(&self) {
    if !self.closed.swap(true, Ordering::AcqRel) {
      tracing::debug!("Tokio executor released, further jobs will be rejected.");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use tokio::sync::oneshot;

  #[tokio::test]
  async fn test_tokio_executor_runs_jobs() {
    let executor = TokioExecutor::new(TokioHandle::current());
    let (tx, rx) = oneshot::channel();
    executor
      .execute(Box::pin(async move {
        let _ = tx.send(42u32);
      }))
      .unwrap();
    assert_eq!(rx.await.unwrap(), 42);
  }

  #[tokio::test]
  async fn test_tokio_executor_rejects_after_shutdown() {
    let executor = Arc::new(TokioExecutor::new(TokioHandle::current()));
    executor.shutdown();
    assert!(executor.is_closed());

    let result = executor.execute(Box::pin(async {}));
    assert!(matches!(result, Err(ExecutorRejected { .. })));
  }
}
