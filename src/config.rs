use crate::error::SchedulerError;

use std::time::Duration;

pub const DEFAULT_CAPACITY: usize = 4;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Construction-time settings for an `AdmissionScheduler`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
  /// Used in logs and spans.
  pub name: String,
  /// Initial ceiling on concurrently running tasks. Adjustable later.
  pub capacity: usize,
  /// Period of the reconciliation tick.
  pub tick_interval: Duration,
  /// Delay before the first reconciliation tick.
  pub initial_delay: Duration,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      name: "transfers".to_string(),
      capacity: DEFAULT_CAPACITY,
      tick_interval: DEFAULT_TICK_INTERVAL,
      initial_delay: Duration::ZERO,
    }
  }
}

impl SchedulerConfig {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  pub fn with_capacity(mut self, capacity: usize) -> Self {
    self.capacity = capacity;
    self
  }

  pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
    self.tick_interval = tick_interval;
    self
  }

  pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
    self.initial_delay = initial_delay;
    self
  }

  pub fn validate(&self) -> Result<(), SchedulerError> {
    if self.capacity == 0 {
      return Err(SchedulerError::CapacityInvalid(self.capacity));
    }
    if self.tick_interval.is_zero() {
      return Err(SchedulerError::InvalidConfig("tick_interval must be greater than zero".to_string()));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_are_valid() {
    let config = SchedulerConfig::default();
    assert_eq!(config.capacity, 4);
    assert_eq!(config.tick_interval, Duration::from_millis(250));
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_zero_capacity_is_rejected() {
    let config = SchedulerConfig::new("uploads").with_capacity(0);
    assert!(matches!(config.validate(), Err(SchedulerError::CapacityInvalid(0))));
  }

  #[test]
  fn test_zero_tick_interval_is_rejected() {
    let config = SchedulerConfig::new("uploads").with_tick_interval(Duration::ZERO);
    assert!(matches!(config.validate(), Err(SchedulerError::InvalidConfig(_))));
  }
}
