//! A Tokio-based admission gate that bounds how many transfer futures run at
//! once, independently of the executor's own sizing, with FIFO queuing,
//! runtime-adjustable capacity, periodic reconciliation and cooperative
//! cancellation.

mod config;
mod error;
mod executor;
mod handle;
mod notifier;
mod observer;
mod pending;
mod recurring;
mod running;
mod scheduler;
mod sink;
mod task;

pub use config::{SchedulerConfig, DEFAULT_CAPACITY, DEFAULT_TICK_INTERVAL};
pub use error::{BoxError, SchedulerError, TaskFailure};
pub use executor::{Executor, ExecutorRejected, Job, TokioExecutor};
pub use handle::TaskHandle;
pub use notifier::{TaskCompletionInfo, TaskCompletionStatus};
pub use recurring::{RecurringActivity, RecurringHandle, RecurringScheduler, TokioRecurring};
pub use scheduler::{AdmissionScheduler, Collaborators, SchedulerSnapshot, ShutdownMode};
pub use sink::{FailureSink, TracingSink};
pub use task::{TaskFuture, TaskId, TaskWork};
