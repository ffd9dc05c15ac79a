//! Waiting-list entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One user's position of interest in a title. Entries are strictly FIFO
/// per title by `enqueued_at`, and a user appears at most once per title.
///
/// Holding an entry doubles as the availability subscription for the
/// title: fulfilment or withdrawal removes both together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitingEntry {
  pub title_id:    Uuid,
  pub user:        String,
  pub enqueued_at: DateTime<Utc>,
}
