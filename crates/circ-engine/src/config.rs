//! Engine configuration.

use serde::Deserialize;

/// Tunable knobs for the engine. Durations are plain integer fields so
/// the struct deserializes from any config source; accessors convert at
/// the edge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// How long an offered copy stays reserved before the hold lapses and
  /// the next waiter is offered it instead.
  pub reservation_timeout_hours: i64,
  /// Cadence of the background reservation sweep.
  pub sweep_interval_secs: u64,
  /// How far ahead of `due_at` a return reminder fires.
  pub reminder_lead_days: i64,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      reservation_timeout_hours: 48,
      sweep_interval_secs:       60,
      reminder_lead_days:        2,
    }
  }
}

impl EngineConfig {
  pub fn reservation_timeout(&self) -> chrono::Duration {
    chrono::Duration::hours(self.reservation_timeout_hours)
  }

  pub fn sweep_interval(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.sweep_interval_secs)
  }

  pub fn reminder_lead(&self) -> chrono::Duration {
    chrono::Duration::days(self.reminder_lead_days)
  }
}
