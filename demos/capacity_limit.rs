use std::time::Duration;

use tokio::runtime::Handle;
use tracing::info;
use transfer_gate::{AdmissionScheduler, BoxError, SchedulerConfig, ShutdownMode, TaskHandle};

async fn upload_chunk(id: usize) -> Result<String, BoxError> {
  info!("Chunk {} uploading (should take 500ms)", id);
  tokio::time::sleep(Duration::from_millis(500)).await;
  Ok(format!("Chunk {} uploaded", id))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Capacity Limit Example (Capacity: 2, raised to 4 halfway) ---");

  let config = SchedulerConfig::new("uploads").with_capacity(2);
  let scheduler = AdmissionScheduler::<String>::with_tokio(config, Handle::current()).expect("Invalid scheduler config");
  scheduler.initialize().expect("Scheduler already closed");

  let mut handles: Vec<TaskHandle<String>> = Vec::new();
  for i in 0..8 {
    match scheduler.submit("s3://bucket", move |_token| upload_chunk(i)) {
      Ok(handle) => handles.push(handle),
      Err(e) => tracing::error!("Failed to submit chunk {}: {}", i, e),
    }
  }
  info!(snapshot = ?scheduler.snapshot(), "All chunks submitted.");

  tokio::time::sleep(Duration::from_millis(600)).await;
  scheduler.set_capacity(4).expect("capacity is positive");
  info!(snapshot = ?scheduler.synchronize(), "Capacity raised.");

  for handle in handles.iter_mut() {
    let task_id = handle.id();
    match handle.await_result().await {
      Ok(result) => info!("Task {}: {}", task_id, result),
      Err(e) => info!("Task {} failed: {}", task_id, e),
    }
  }

  scheduler
    .shutdown(ShutdownMode::Graceful)
    .await
    .expect("Scheduler shutdown failed");
  info!("--- Capacity Limit Example End ---");
}
