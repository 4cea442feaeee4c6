use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::info;
use transfer_gate::{
  AdmissionScheduler, BoxError, Collaborators, FailureSink, SchedulerConfig, SchedulerError, ShutdownMode, TaskFailure,
};

/// Prints failures the way a desktop client would append them to its log file.
struct ConsoleSink;

impl FailureSink for ConsoleSink {
  fn log(&self, source: &str, failure: &TaskFailure, context: &str) {
    eprintln!("[{}] {} ({})", source, failure, context);
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Failing Task Example ---");

  let collaborators = Collaborators::tokio(Handle::current()).with_sink(Arc::new(ConsoleSink));
  let scheduler = AdmissionScheduler::<u64>::new(SchedulerConfig::new("downloads"), Handle::current(), collaborators)
    .expect("Invalid scheduler config");
  scheduler.initialize().expect("Scheduler already closed");
  scheduler.add_completion_handler(|info| {
    info!(task_id = info.task_id, origin = %info.origin, status = ?info.status, "Transfer finished.");
  });

  let mut failing = scheduler
    .submit("gdrive", |_token| async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Err::<u64, BoxError>(Box::new(io::Error::new(io::ErrorKind::ConnectionReset, "remote closed the stream")))
    })
    .expect("Failed to submit failing task");

  let mut panicking = scheduler
    .submit("dropbox", |_token| async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      let chunks: Vec<u64> = Vec::new();
      Ok::<u64, BoxError>(chunks[3])
    })
    .expect("Failed to submit panicking task");

  let mut healthy = scheduler
    .submit("onedrive", |_token| async { Ok::<u64, BoxError>(4096) })
    .expect("Failed to submit healthy task");

  for handle in [&mut failing, &mut panicking, &mut healthy] {
    let task_id = handle.id();
    match handle.await_result().await {
      Ok(bytes) => info!("Task {} transferred {} bytes.", task_id, bytes),
      Err(SchedulerError::TaskFailed(failure)) => info!("Task {} failed: {}", task_id, failure),
      Err(e) => info!("Task {} ended with {:?}", task_id, e),
    }
  }

  scheduler
    .shutdown(ShutdownMode::Graceful)
    .await
    .expect("Scheduler shutdown failed");
  info!("--- Failing Task Example End ---");
}
