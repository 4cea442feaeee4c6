use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle as TokioHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace, Instrument};

/// A periodic activity registered with the host.
pub type RecurringActivity = Arc<dyn Fn() + Send + Sync + 'static>;

/// Handle to a registered recurring activity. Cancelling it stops further runs.
#[derive(Debug, Clone)]
pub struct RecurringHandle {
  token: CancellationToken,
}

impl RecurringHandle {
  pub fn new(token: CancellationToken) -> Self {
    Self { token }
  }

  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }
}

/// Host facility used to drive the reconciliation loop.
pub trait RecurringScheduler: Send + Sync + 'static {
  fn register_recurring(
    &self,
    name: &str,
    activity: RecurringActivity,
    initial_delay: Duration,
    period: Duration,
  ) -> RecurringHandle;
}

/// Runs recurring activities as Tokio tasks.
#[derive(Debug, Clone)]
pub struct TokioRecurring {
  handle: TokioHandle,
}

impl TokioRecurring {
  pub fn new(handle: TokioHandle) -> Self {
    Self { handle }
  }
}

impl RecurringScheduler for TokioRecurring {
  fn register_recurring(
    &self,
    name: &str,
    activity: RecurringActivity,
    initial_delay: Duration,
    period: Duration,
  ) -> RecurringHandle {
    let token = CancellationToken::new();
    let loop_token = token.clone();
    let span_name = name.to_string();
    // interval() panics on a zero period.
    let period = period.max(Duration::from_millis(1));

    self.handle.spawn(
      async move {
        tokio::select! {
          biased;
          _ = loop_token.cancelled() => {
            debug!("Recurring activity cancelled before its first run.");
            return;
          }
          _ = tokio::time::sleep(initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
          tokio::select! {
            biased;
            _ = loop_token.cancelled() => break,
            _ = ticker.tick() => {
              if std::panic::catch_unwind(AssertUnwindSafe(|| activity())).is_err() {
                error!("Recurring activity panicked, it will run again on the next tick.");
              } else {
                trace!("Recurring activity ran.");
              }
            }
          }
        }
        debug!("Recurring activity stopped.");
      }
      .instrument(info_span!("recurring_activity", name = %span_name)),
    );

    RecurringHandle::new(token)
  }
}
