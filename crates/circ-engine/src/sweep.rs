//! Background reservation sweep.
//!
//! The only scheduled activity the engine needs: a low-frequency tick
//! that lapses expired reservations (re-offering each copy to the next
//! waiter) and publishes due-soon return reminders.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::service::Engine;

/// Spawn the sweep on the current tokio runtime. The task runs until the
/// returned handle is aborted.
pub fn spawn_sweeper(engine: Arc<Engine>) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval(engine.config().sweep_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      ticker.tick().await;
      let now = Utc::now();
      let lapsed = engine.expire_reservations(now);
      if !lapsed.is_empty() {
        tracing::debug!(count = lapsed.len(), "sweep lapsed reservations");
      }
      engine.publish_due_reminders(now);
    }
  })
}
