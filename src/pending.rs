use crate::task::{ScheduledTask, TaskId};

use std::collections::VecDeque;

/// FIFO holding area for admitted tasks that have not been dispatched yet.
///
/// Only the scheduler touches this, and only while holding its state lock.
#[derive(Debug)]
pub(crate) struct PendingQueue<R: Send + 'static> {
  tasks: VecDeque<ScheduledTask<R>>,
}

impl<R: Send + 'static> PendingQueue<R> {
  pub(crate) fn new() -> Self {
    Self { tasks: VecDeque::new() }
  }

  pub(crate) fn push_back(&mut self, task: ScheduledTask<R>) {
    self.tasks.push_back(task);
  }

  /// Takes the oldest pending task.
  pub(crate) fn pop_front(&mut self) -> Option<ScheduledTask<R>> {
    self.tasks.pop_front()
  }

  /// Withdraws a specific task, keeping the order of the rest.
  pub(crate) fn remove(&mut self, task_id: TaskId) -> Option<ScheduledTask<R>> {
    let index = self.tasks.iter().position(|t| t.task_id == task_id)?;
    self.tasks.remove(index)
  }

  /// Withdraws every task whose origin matches.
  pub(crate) fn remove_by_origin(&mut self, origin: &str) -> Vec<ScheduledTask<R>> {
    let mut removed = Vec::new();
    let mut kept = VecDeque::with_capacity(self.tasks.len());
    for task in self.tasks.drain(..) {
      if &*task.origin == origin {
        removed.push(task);
      } else {
        kept.push_back(task);
      }
    }
    self.tasks = kept;
    removed
  }

  pub(crate) fn drain_all(&mut self) -> Vec<ScheduledTask<R>> {
    self.tasks.drain(..).collect()
  }

  pub(crate) fn len(&self) -> usize {
    self.tasks.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::TaskFuture;
  use std::sync::Arc;
  use tokio_util::sync::CancellationToken;

  fn dummy_task(id: TaskId, origin: &str) -> ScheduledTask<u32> {
    ScheduledTask {
      task_id: id,
      origin: Arc::from(origin),
      work: Box::new(|_token: CancellationToken| -> TaskFuture<u32> { Box::pin(async { Ok(7) }) }),
      token: CancellationToken::new(),
      result_sender: None,
    }
  }

  fn ids(queue: &mut PendingQueue<u32>) -> Vec<TaskId> {
    queue.drain_all().into_iter().map(|t| t.task_id).collect()
  }

  #[test]
  fn test_pop_front_preserves_submission_order() {
    let mut queue = PendingQueue::new();
    for id in 1..=4 {
      queue.push_back(dummy_task(id, "drive"));
    }
    assert_eq!(queue.pop_front().map(|t| t.task_id), Some(1));
    assert_eq!(queue.pop_front().map(|t| t.task_id), Some(2));
    assert_eq!(queue.len(), 2);
  }

  #[test]
  fn test_remove_withdraws_only_the_target() {
    let mut queue = PendingQueue::new();
    for id in 1..=4 {
      queue.push_back(dummy_task(id, "drive"));
    }
    assert_eq!(queue.remove(3).map(|t| t.task_id), Some(3));
    assert!(queue.remove(3).is_none());
    assert_eq!(ids(&mut queue), vec![1, 2, 4]);
    assert!(queue.is_empty());
  }

  #[test]
  fn test_remove_by_origin_keeps_order_of_survivors() {
    let mut queue = PendingQueue::new();
    queue.push_back(dummy_task(1, "dropbox"));
    queue.push_back(dummy_task(2, "gdrive"));
    queue.push_back(dummy_task(3, "dropbox"));
    queue.push_back(dummy_task(4, "onedrive"));

    let removed: Vec<TaskId> = queue.remove_by_origin("dropbox").into_iter().map(|t| t.task_id).collect();
    assert_eq!(removed, vec![1, 3]);
    assert_eq!(ids(&mut queue), vec![2, 4]);
  }
}
