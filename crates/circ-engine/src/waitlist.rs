//! Per-title FIFO waiting list.
//!
//! Fairness is the whole contract: the user who has waited longest is
//! always the next to be offered a freed copy, with no priority override.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use circ_core::{Error, Result, waitlist::WaitingEntry};
use uuid::Uuid;

#[derive(Debug)]
pub struct WaitingList {
  title_id: Uuid,
  entries:  VecDeque<WaitingEntry>,
}

impl WaitingList {
  pub fn new(title_id: Uuid) -> Self {
    Self { title_id, entries: VecDeque::new() }
  }

  /// Rebuild a list from persisted entries (already FIFO-ordered).
  /// Rejects duplicate users.
  pub fn from_entries(
    title_id: Uuid,
    entries: Vec<WaitingEntry>,
  ) -> Result<Self> {
    let mut list = Self::new(title_id);
    for entry in entries {
      if list.position(&entry.user).is_some() {
        return Err(Error::InvalidSnapshot(format!(
          "user {} waits twice for title {title_id}",
          entry.user
        )));
      }
      list.entries.push_back(entry);
    }
    Ok(list)
  }

  /// Append a user. Fails with [`Error::AlreadyWaiting`] if they already
  /// hold a position.
  pub fn enqueue(
    &mut self,
    user: &str,
    at: DateTime<Utc>,
  ) -> Result<WaitingEntry> {
    if self.position(user).is_some() {
      return Err(Error::AlreadyWaiting {
        title_id: self.title_id,
        user:     user.to_owned(),
      });
    }
    let entry = WaitingEntry {
      title_id:    self.title_id,
      user:        user.to_owned(),
      enqueued_at: at,
    };
    self.entries.push_back(entry.clone());
    Ok(entry)
  }

  /// Pop the earliest-enqueued user, or `None` if nobody waits.
  pub fn dequeue_next(&mut self) -> Option<WaitingEntry> {
    self.entries.pop_front()
  }

  /// Remove `user` if present. Idempotent; returns the index the entry
  /// held so callers can notify the waiters whose rank shifted.
  pub fn withdraw(&mut self, user: &str) -> Option<usize> {
    let idx = self.entries.iter().position(|e| e.user == user)?;
    self.entries.remove(idx);
    Some(idx)
  }

  /// 1-based rank, or `None` if the user is not waiting.
  pub fn position(&self, user: &str) -> Option<usize> {
    self.entries.iter().position(|e| e.user == user).map(|i| i + 1)
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  pub fn users(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|e| e.user.as_str())
  }

  pub fn entries(&self) -> impl Iterator<Item = &WaitingEntry> {
    self.entries.iter()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fifo_order_is_enqueue_order() {
    let mut list = WaitingList::new(Uuid::new_v4());
    let now = Utc::now();
    list.enqueue("a", now).unwrap();
    list.enqueue("b", now + chrono::Duration::seconds(1)).unwrap();
    list.enqueue("c", now + chrono::Duration::seconds(2)).unwrap();

    assert_eq!(list.position("b"), Some(2));
    assert_eq!(list.dequeue_next().unwrap().user, "a");
    assert_eq!(list.position("b"), Some(1));
  }

  #[test]
  fn duplicate_enqueue_is_rejected() {
    let mut list = WaitingList::new(Uuid::new_v4());
    list.enqueue("a", Utc::now()).unwrap();
    assert!(matches!(
      list.enqueue("a", Utc::now()),
      Err(Error::AlreadyWaiting { .. })
    ));
  }

  #[test]
  fn withdraw_is_idempotent() {
    let mut list = WaitingList::new(Uuid::new_v4());
    list.enqueue("a", Utc::now()).unwrap();
    assert_eq!(list.withdraw("a"), Some(0));
    assert_eq!(list.withdraw("a"), None);
    assert!(list.is_empty());
  }
}
