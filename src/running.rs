use crate::task::TaskId;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

/// Set once a dispatched job has stopped, whichever way it stopped.
#[derive(Debug, Clone, Default)]
pub(crate) struct FinishFlag(Arc<AtomicBool>);

impl FinishFlag {
  pub(crate) fn mark(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub(crate) fn is_set(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

#[derive(Debug)]
pub(crate) struct RunningEntry {
  pub(crate) origin: Arc<str>,
  pub(crate) token: CancellationToken,
  pub(crate) finished: FinishFlag,
  pub(crate) dispatched_at: Instant,
}

/// Tasks currently handed to the executor.
#[derive(Debug, Default)]
pub(crate) struct RunningSet {
  entries: HashMap<TaskId, RunningEntry>,
}

impl RunningSet {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Registers a task and returns the flag its job must set when it stops.
  pub(crate) fn insert(&mut self, task_id: TaskId, origin: Arc<str>, token: CancellationToken) -> FinishFlag {
    let finished = FinishFlag::default();
    self.entries.insert(
      task_id,
      RunningEntry {
        origin,
        token,
        finished: finished.clone(),
        dispatched_at: Instant::now(),
      },
    );
    finished
  }

  /// Removes a task. Returns `None` if another path already removed it.
  pub(crate) fn remove(&mut self, task_id: TaskId) -> Option<RunningEntry> {
    self.entries.remove(&task_id)
  }

  /// Drops every entry whose job has stopped. Returns how many were pruned.
  pub(crate) fn prune_finished(&mut self) -> usize {
    let before = self.entries.len();
    self.entries.retain(|_, entry| !entry.finished.is_set());
    before - self.entries.len()
  }

  #[cfg(test)]
  pub(crate) fn contains(&self, task_id: TaskId) -> bool {
    self.entries.contains_key(&task_id)
  }

  /// Raises the cancellation flag of every running task with this origin.
  pub(crate) fn cancel_by_origin(&self, origin: &str) -> usize {
    let mut flagged = 0;
    for (task_id, entry) in self.entries.iter().filter(|(_, e)| &*e.origin == origin) {
      tracing::debug!(%task_id, "Flagging running task for cancellation due to origin match.");
      entry.token.cancel();
      flagged += 1;
    }
    flagged
  }

  pub(crate) fn cancel_all(&self) {
    for (task_id, entry) in self.entries.iter() {
      tracing::debug!(
        %task_id,
        running_for_ms = entry.dispatched_at.elapsed().as_millis() as u64,
        "Flagging running task for cancellation during shutdown."
      );
      entry.token.cancel();
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }

  #[cfg(test)]
  pub(crate) fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}
