use crate::config::SchedulerConfig;
use crate::error::{BoxError, SchedulerError};
use crate::executor::{Executor, Job, TokioExecutor};
use crate::handle::TaskHandle;
use crate::notifier::{CompletionNotifier, TaskCompletionInfo, TaskCompletionStatus};
use crate::observer::{CompletionObserver, Outcome};
use crate::pending::PendingQueue;
use crate::recurring::{RecurringActivity, RecurringHandle, RecurringScheduler, TokioRecurring};
use crate::running::{FinishFlag, RunningSet};
use crate::sink::{FailureSink, TracingSink};
use crate::task::{ResultSender, ScheduledTask, TaskFuture, TaskId, TaskWork};

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

static NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Defines how the scheduler should behave upon shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Waits for running tasks to complete.
  /// Pending tasks that haven't started are discarded.
  Graceful,
  /// Keeps promoting pending tasks until every admitted task has run.
  /// Lifts a pause.
  Drain,
  /// Raises the cancellation flag of every running task, then waits for them.
  /// Pending tasks that haven't started are discarded.
  CancelRunning,
}

/// Point-in-time view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSnapshot {
  pub capacity: usize,
  pub running: usize,
  pub pending: usize,
  pub closed: bool,
  pub paused: bool,
  pub unavailable: bool,
}

/// The external facilities a scheduler is built on.
#[derive(Clone)]
pub struct Collaborators {
  pub executor: Arc<dyn Executor>,
  pub recurring: Arc<dyn RecurringScheduler>,
  pub sink: Arc<dyn FailureSink>,
}

impl Collaborators {
  /// Tokio executor and ticker, failures logged through `tracing`.
  pub fn tokio(handle: TokioHandle) -> Self {
    Self {
      executor: Arc::new(TokioExecutor::new(handle.clone())),
      recurring: Arc::new(TokioRecurring::new(handle)),
      sink: Arc::new(TracingSink),
    }
  }

  pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
    self.executor = executor;
    self
  }

  pub fn with_recurring(mut self, recurring: Arc<dyn RecurringScheduler>) -> Self {
    self.recurring = recurring;
    self
  }

  pub fn with_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
    self.sink = sink;
    self
  }
}

impl fmt::Debug for Collaborators {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Collaborators").finish_non_exhaustive()
  }
}

/// Everything the single gate lock protects.
struct GateState<R: Send + 'static> {
  capacity: usize,
  pending: PendingQueue<R>,
  running: RunningSet,
  closed: bool,
  paused: bool,
  /// Set by the first executor refusal; the gate stops admitting for good.
  unavailable: Option<String>,
}

impl<R: Send + 'static> GateState<R> {
  fn snapshot(&self) -> SchedulerSnapshot {
    SchedulerSnapshot {
      capacity: self.capacity,
      running: self.running.len(),
      pending: self.pending.len(),
      closed: self.closed,
      paused: self.paused,
      unavailable: self.unavailable.is_some(),
    }
  }

  fn has_free_slot(&self) -> bool {
    self.running.len() < self.capacity
  }

  /// Whether queued work may be started at all right now.
  fn admitting(&self) -> bool {
    !self.paused && self.unavailable.is_none()
  }
}

/// Marks the running entry finished however the job ends, including being
/// dropped unpolled by the executor.
struct FinishGuard(FinishFlag);

impl Drop for FinishGuard {
  fn drop(&mut self) {
    self.0.mark();
  }
}

type ResultSlot<R> = Arc<Mutex<Option<ResultSender<R>>>>;

/// Bounds how many submitted tasks run at once, independently of the
/// executor's own sizing.
///
/// Submission never waits: a task either starts immediately or joins a FIFO
/// queue. Queued tasks are only promoted by reconciliation, which runs on the
/// recurring tick started by [`initialize`](Self::initialize) or on demand via
/// [`synchronize`](Self::synchronize).
pub struct AdmissionScheduler<R: Send + 'static> {
  name: Arc<String>,
  config: SchedulerConfig,
  state: Mutex<GateState<R>>,
  executor: Arc<dyn Executor>,
  recurring: Arc<dyn RecurringScheduler>,
  observer: Arc<CompletionObserver>,
  notifier: Arc<CompletionNotifier>,
  tick: Mutex<Option<RecurringHandle>>,
  running_changed: Notify,
  self_ref: Weak<Self>,
}

impl<R: Send + 'static> fmt::Debug for AdmissionScheduler<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AdmissionScheduler")
      .field("name", &self.name)
      .field("state", &self.snapshot())
      .finish_non_exhaustive()
  }
}

impl<R: Send + 'static> AdmissionScheduler<R> {
  pub fn new(
    config: SchedulerConfig,
    tokio_handle: TokioHandle,
    collaborators: Collaborators,
  ) -> Result<Arc<Self>, SchedulerError> {
    config.validate()?;
    let name = Arc::new(config.name.clone());
    let notifier = Arc::new(CompletionNotifier::new(tokio_handle, name.clone()));
    let observer = Arc::new(CompletionObserver::new(
      name.clone(),
      collaborators.sink,
      notifier.clone(),
    ));

    info!(scheduler = %name, capacity = config.capacity, tick_ms = config.tick_interval.as_millis() as u64, "Admission scheduler created.");

    Ok(Arc::new_cyclic(|self_ref| Self {
      name,
      state: Mutex::new(GateState {
        capacity: config.capacity,
        pending: PendingQueue::new(),
        running: RunningSet::new(),
        closed: false,
        paused: false,
        unavailable: None,
      }),
      config,
      executor: collaborators.executor,
      recurring: collaborators.recurring,
      observer,
      notifier,
      tick: Mutex::new(None),
      running_changed: Notify::new(),
      self_ref: self_ref.clone(),
    }))
  }

  /// Builds a scheduler on the given runtime with the default collaborators.
  pub fn with_tokio(config: SchedulerConfig, tokio_handle: TokioHandle) -> Result<Arc<Self>, SchedulerError> {
    Self::new(config, tokio_handle.clone(), Collaborators::tokio(tokio_handle))
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn capacity(&self) -> usize {
    self.state.lock().capacity
  }

  pub fn running_count(&self) -> usize {
    self.state.lock().running.len()
  }

  pub fn pending_count(&self) -> usize {
    self.state.lock().pending.len()
  }

  pub fn is_closed(&self) -> bool {
    self.state.lock().closed
  }

  pub fn is_paused(&self) -> bool {
    self.state.lock().paused
  }

  /// Reads the current state without reconciling.
  pub fn snapshot(&self) -> SchedulerSnapshot {
    self.state.lock().snapshot()
  }

  /// Submits work and returns its handle immediately.
  ///
  /// `work` is invoked only when the task is dispatched, with the task's
  /// cancellation token. The task is dispatched right away only if a slot is
  /// free, nothing older is queued and admission is not paused. Otherwise it
  /// waits in FIFO order for a reconciliation pass.
  ///
  /// # Errors
  /// `SchedulerClosed` after shutdown began; `SchedulerUnavailable` once the
  /// executor has refused a task, including this one.
  pub fn submit<F, Fut>(&self, origin: &str, work: F) -> Result<TaskHandle<R>, SchedulerError>
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
  {
    let task_id = NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let origin: Arc<str> = Arc::from(origin);
    let token = CancellationToken::new();
    let (result_tx, result_rx) = oneshot::channel::<Result<R, SchedulerError>>();
    let work: TaskWork<R> = Box::new(move |token: CancellationToken| -> TaskFuture<R> { Box::pin(work(token)) });

    let task = ScheduledTask {
      task_id,
      origin: origin.clone(),
      work,
      token: token.clone(),
      result_sender: Some(result_tx),
    };

    let admitted = {
      let mut state = self.state.lock();
      if state.closed {
        drop(state);
        warn!(scheduler = %self.name, %task_id, "Submit: Attempted to submit task to a closed scheduler.");
        return Err(SchedulerError::SchedulerClosed);
      }
      if let Some(reason) = state.unavailable.clone() {
        drop(state);
        warn!(scheduler = %self.name, %task_id, "Submit: Executor is unavailable, rejecting task.");
        return Err(SchedulerError::SchedulerUnavailable(reason));
      }
      if state.admitting() && state.has_free_slot() && state.pending.is_empty() {
        let finished = state.running.insert(task_id, origin.clone(), token.clone());
        Some((task, finished))
      } else {
        state.pending.push_back(task);
        None
      }
    };

    let handle = TaskHandle {
      task_id,
      origin,
      cancellation_token: token,
      result_receiver: Some(result_rx),
      scheduler: self.self_ref.clone(),
    };

    match admitted {
      Some((task, finished)) => {
        debug!(scheduler = %self.name, %task_id, origin = %handle.origin, "Task admitted immediately.");
        self.dispatch(task, finished)?;
      }
      None => debug!(scheduler = %self.name, %task_id, origin = %handle.origin, "Task queued behind older work or a full gate."),
    }
    Ok(handle)
  }

  /// Changes the ceiling on running tasks. Running tasks are never preempted;
  /// a raised ceiling is used by the next reconciliation pass.
  pub fn set_capacity(&self, capacity: usize) -> Result<(), SchedulerError> {
    if capacity == 0 {
      warn!(scheduler = %self.name, "Rejected capacity of 0, keeping the previous value.");
      return Err(SchedulerError::CapacityInvalid(capacity));
    }
    let previous = {
      let mut state = self.state.lock();
      std::mem::replace(&mut state.capacity, capacity)
    };
    info!(scheduler = %self.name, previous, capacity, "Capacity changed.");
    Ok(())
  }

  /// Holds admission, e.g. while the host is offline. Submissions are queued
  /// and reconciliation only prunes. Running tasks are untouched.
  pub fn pause(&self) {
    let was_paused = std::mem::replace(&mut self.state.lock().paused, true);
    if !was_paused {
      info!(scheduler = %self.name, "Admission paused.");
    }
  }

  /// Lifts a pause. Queued tasks are promoted, oldest first, by the next
  /// reconciliation pass.
  pub fn resume(&self) {
    let was_paused = std::mem::replace(&mut self.state.lock().paused, false);
    if was_paused {
      info!(scheduler = %self.name, "Admission resumed.");
    }
  }

  /// Registers the recurring reconciliation tick with the host facility.
  /// Calling it again while the tick is registered does nothing.
  pub fn initialize(&self) -> Result<(), SchedulerError> {
    if self.is_closed() {
      return Err(SchedulerError::SchedulerClosed);
    }
    let mut tick = self.tick.lock();
    if tick.is_some() {
      debug!(scheduler = %self.name, "Reconciliation tick already registered.");
      return Ok(());
    }

    let weak = self.self_ref.clone();
    let activity: RecurringActivity = Arc::new(move || {
      if let Some(scheduler) = weak.upgrade() {
        scheduler.synchronize();
      }
    });
    *tick = Some(self.recurring.register_recurring(
      &format!("{}::reconcile", self.name),
      activity,
      self.config.initial_delay,
      self.config.tick_interval,
    ));
    info!(scheduler = %self.name, "Reconciliation tick registered.");
    Ok(())
  }

  /// Runs one reconciliation pass: prunes finished entries, then promotes the
  /// oldest pending tasks while slots are free and admission is open.
  pub fn synchronize(&self) -> SchedulerSnapshot {
    let (pruned, promoted, snapshot) = {
      let mut state = self.state.lock();
      let pruned = state.running.prune_finished();
      let mut promoted = Vec::new();
      while state.admitting() && state.has_free_slot() {
        let Some(task) = state.pending.pop_front() else {
          break;
        };
        if task.token.is_cancelled() {
          // Cancelled between flag and withdrawal; settled below without running.
          promoted.push((task, None));
          continue;
        }
        let finished = state.running.insert(task.task_id, task.origin.clone(), task.token.clone());
        promoted.push((task, Some(finished)));
      }
      (pruned, promoted, state.snapshot())
    };

    if pruned > 0 {
      debug!(scheduler = %self.name, pruned, "Pruned finished tasks from the running set.");
      self.running_changed.notify_waiters();
    }
    let mut refusal: Option<String> = None;
    for (mut task, finished) in promoted {
      match (finished, refusal.clone()) {
        (Some(_), Some(reason)) => {
          // Promoted in the same pass as a refused task.
          self.release_running(task.task_id);
          self.settle_unavailable(task, &reason);
        }
        (Some(finished), None) => {
          debug!(scheduler = %self.name, task_id = %task.task_id, "Promoting queued task.");
          if let Err(SchedulerError::SchedulerUnavailable(reason)) = self.dispatch(task, finished) {
            refusal = Some(reason);
          }
        }
        (None, _) => {
          task.resolve(Err(SchedulerError::TaskCancelled));
          self.observer.discarded(task.task_id, &task.origin, TaskCompletionStatus::Cancelled);
        }
      }
    }
    // A refusal changed the state after the snapshot was taken.
    let snapshot = if refusal.is_some() { self.snapshot() } else { snapshot };
    trace!(scheduler = %self.name, ?snapshot, "Reconciliation pass done.");
    snapshot
  }

  /// Withdraws every pending task with this origin and flags every running one.
  /// Returns how many tasks were affected.
  pub fn cancel_by_origin(&self, origin: &str) -> usize {
    let (withdrawn, flagged) = {
      let mut state = self.state.lock();
      let withdrawn = state.pending.remove_by_origin(origin);
      let flagged = state.running.cancel_by_origin(origin);
      (withdrawn, flagged)
    };
    info!(scheduler = %self.name, %origin, withdrawn = withdrawn.len(), flagged, "Cancelled tasks by origin.");
    let total = withdrawn.len() + flagged;
    for mut task in withdrawn {
      task.token.cancel();
      task.resolve(Err(SchedulerError::TaskCancelled));
      self.observer.discarded(task.task_id, &task.origin, TaskCompletionStatus::Cancelled);
    }
    total
  }

  /// Registers a handler called once for every task that reaches a terminal state.
  pub fn add_completion_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.notifier.add_handler(handler);
  }

  /// Stops accepting submissions and waits for running tasks to finish.
  ///
  /// Returns once the running set is empty, the tick is stopped, the executor
  /// is released and pending completion events are delivered. Calling it again
  /// only waits.
  pub async fn shutdown(&self, mode: ShutdownMode) -> Result<(), SchedulerError> {
    let (first_call, discarded) = {
      let mut state = self.state.lock();
      let first_call = !state.closed;
      state.closed = true;
      let mut discarded = Vec::new();
      if first_call {
        if mode == ShutdownMode::Drain {
          state.paused = false;
        } else {
          discarded = state.pending.drain_all();
        }
        if mode == ShutdownMode::CancelRunning {
          state.running.cancel_all();
        }
      }
      (first_call, discarded)
    };

    if first_call {
      info!(scheduler = %self.name, ?mode, discarded = discarded.len(), "Initiating scheduler shutdown.");
    } else {
      info!(scheduler = %self.name, "Shutdown already in progress or completed, waiting for running tasks.");
    }
    for mut task in discarded {
      task.token.cancel();
      task.resolve(Err(SchedulerError::SchedulerClosed));
      self.observer.discarded(task.task_id, &task.origin, TaskCompletionStatus::Discarded);
    }

    loop {
      let notified = self.running_changed.notified();
      let snapshot = self.synchronize();
      if snapshot.running == 0 && snapshot.pending == 0 {
        break;
      }
      trace!(scheduler = %self.name, ?snapshot, "Waiting for tasks to finish before shutdown completes.");
      // The timeout also covers jobs the executor dropped, which only show up on a prune.
      let _ = tokio::time::timeout(self.config.tick_interval, notified).await;
    }

    if let Some(tick) = self.tick.lock().take() {
      tick.cancel();
    }
    if first_call {
      self.executor.shutdown();
      self.notifier.close_and_join().await;
      info!(scheduler = %self.name, "Scheduler shutdown completed.");
    }
    Ok(())
  }

  /// Withdraws a task that has not started yet. Returns `false` if it was not pending.
  pub(crate) fn withdraw_pending(&self, task_id: TaskId) -> bool {
    let withdrawn = self.state.lock().pending.remove(task_id);
    match withdrawn {
      Some(mut task) => {
        debug!(scheduler = %self.name, %task_id, "Withdrew pending task after cancellation.");
        task.resolve(Err(SchedulerError::TaskCancelled));
        self.observer.discarded(task_id, &task.origin, TaskCompletionStatus::Cancelled);
        true
      }
      None => false,
    }
  }

  fn release_running(&self, task_id: TaskId) {
    let removed = self.state.lock().running.remove(task_id).is_some();
    if removed {
      self.running_changed.notify_waiters();
    }
  }

  fn settle_unavailable(&self, mut task: ScheduledTask<R>, reason: &str) {
    task.resolve(Err(SchedulerError::SchedulerUnavailable(reason.to_string())));
    self.observer.discarded(task.task_id, &task.origin, TaskCompletionStatus::Discarded);
  }

  /// Hands an admitted task to the executor. Must be called without the lock;
  /// the task is already counted in the running set.
  ///
  /// A refusal marks the scheduler unavailable and settles everything queued.
  fn dispatch(&self, task: ScheduledTask<R>, finished: FinishFlag) -> Result<(), SchedulerError> {
    let ScheduledTask {
      task_id,
      origin,
      work,
      token,
      result_sender,
    } = task;
    let slot: ResultSlot<R> = Arc::new(Mutex::new(result_sender));
    let job = self.build_job(task_id, origin.clone(), work, token, slot.clone(), finished);

    match self.executor.execute(job) {
      Ok(()) => Ok(()),
      Err(rejected) => {
        error!(scheduler = %self.name, %task_id, "Executor refused task, scheduler is now unavailable: {}", rejected);
        let reason = rejected.reason;
        let stranded = {
          let mut state = self.state.lock();
          state.running.remove(task_id);
          if state.unavailable.is_none() {
            state.unavailable = Some(reason.clone());
          }
          state.pending.drain_all()
        };
        self.running_changed.notify_waiters();

        let err = SchedulerError::SchedulerUnavailable(reason.clone());
        if let Some(tx) = slot.lock().take() {
          let _ = tx.send(Err(err.clone()));
        }
        self.observer.discarded(task_id, &origin, TaskCompletionStatus::Discarded);
        for task in stranded {
          self.settle_unavailable(task, &reason);
        }
        Err(err)
      }
    }
  }

  fn build_job(
    &self,
    task_id: TaskId,
    origin: Arc<str>,
    work: TaskWork<R>,
    token: CancellationToken,
    slot: ResultSlot<R>,
    finished: FinishFlag,
  ) -> Job {
    let scheduler = self.self_ref.clone();
    let observer = self.observer.clone();
    let span = info_span!("admitted_task", scheduler = %self.name, %task_id, origin = %origin);
    // Moved into the job so it also fires when the job is dropped unpolled.
    let guard = FinishGuard(finished);

    Box::pin(
      async move {
        let work_token = token.clone();
        let raw = AssertUnwindSafe(async move { work(work_token).await })
          .catch_unwind()
          .await;

        let outcome = Outcome::classify(raw, token.is_cancelled());
        let result = observer.observe(task_id, &origin, outcome);
        drop(guard);
        if let Some(scheduler) = scheduler.upgrade() {
          scheduler.release_running(task_id);
        }

        let sender = slot.lock().take();
        if let Some(tx) = sender {
          if tx.send(result).is_err() {
            trace!(%task_id, "Result receiver for task was dropped. Task outcome discarded.");
          }
        }
      }
      .instrument(span),
    )
  }
}

impl<R: Send + 'static> Drop for AdmissionScheduler<R> {
  fn drop(&mut self) {
    let state = self.state.get_mut();
    if !state.closed {
      state.closed = true;
      let discarded = state.pending.drain_all();
      info!(
        scheduler = %self.name,
        discarded = discarded.len(),
        "AdmissionScheduler dropped without shutdown. Discarding pending tasks."
      );
      for mut task in discarded {
        task.token.cancel();
        task.resolve(Err(SchedulerError::SchedulerClosed));
        self.observer.discarded(task.task_id, &task.origin, TaskCompletionStatus::Discarded);
      }
    } else {
      trace!(scheduler = %self.name, "Drop: Shutdown already initiated.");
    }
    if let Some(tick) = self.tick.get_mut().take() {
      tick.cancel();
    }
    self.notifier.close();
  }
}
