//! Observer registry and synchronous event fan-out.
//!
//! Delivery is best-effort and decoupled from the state transition that
//! triggered it: by the time an event is published, the transition has
//! already committed inside its critical section. A failing observer is
//! logged and skipped; it never rolls anything back and never starves
//! later observers.

use std::sync::Arc;

use circ_core::loan::{CopyId, Loan};
use parking_lot::Mutex;
use strum::EnumDiscriminants;
use uuid::Uuid;

// ─── Events ──────────────────────────────────────────────────────────────────

/// A circulation event. The discriminant enum [`EventKind`] is what
/// observers subscribe to.
#[derive(Debug, Clone, EnumDiscriminants)]
#[strum_discriminants(name(EventKind))]
pub enum Event {
  /// A freed copy has been offered to the head of the waiting list.
  CopyAvailable {
    title_id: Uuid,
    copy:     CopyId,
    offered:  String,
  },
  /// A waiter's 1-based rank changed (somebody ahead left the queue),
  /// or they just joined at this rank.
  WaitingPositionChanged {
    title_id:     Uuid,
    user:         String,
    new_position: usize,
  },
  LoanConfirmed { loan: Loan },
  ReturnReminder { loan: Loan },
}

impl Event {
  pub fn kind(&self) -> EventKind { self.into() }

  /// The title the event is scoped to.
  pub fn title_id(&self) -> Uuid {
    match self {
      Event::CopyAvailable { title_id, .. } => *title_id,
      Event::WaitingPositionChanged { title_id, .. } => *title_id,
      Event::LoanConfirmed { loan } => loan.copy.title_id,
      Event::ReturnReminder { loan } => loan.copy.title_id,
    }
  }
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// Which titles a subscription covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleScope {
  All,
  Title(Uuid),
}

impl TitleScope {
  fn covers(&self, title_id: Uuid) -> bool {
    match self {
      TitleScope::All => true,
      TitleScope::Title(id) => *id == title_id,
    }
  }
}

/// An external party receiving events. Delivery happens synchronously on
/// the publishing thread; implementations must not block for long.
pub trait Observer: Send + Sync {
  fn deliver(
    &self,
    event: &Event,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub type SubscriptionId = u64;

struct SubEntry {
  id:       SubscriptionId,
  kind:     EventKind,
  scope:    TitleScope,
  observer: Arc<dyn Observer>,
}

#[derive(Default)]
struct Registry {
  next_id: SubscriptionId,
  subs:    Vec<SubEntry>,
}

// ─── Center ──────────────────────────────────────────────────────────────────

/// Process-scoped registry with explicit construction — constructed once
/// and passed by reference to every component that publishes.
#[derive(Default)]
pub struct NotificationCenter {
  inner: Mutex<Registry>,
}

impl NotificationCenter {
  pub fn new() -> Self { Self::default() }

  /// Register `observer` for one event kind within `scope`. Safe to call
  /// from any thread; delivery order follows subscription order.
  pub fn subscribe(
    &self,
    kind: EventKind,
    scope: TitleScope,
    observer: Arc<dyn Observer>,
  ) -> SubscriptionId {
    let mut registry = self.inner.lock();
    let id = registry.next_id;
    registry.next_id += 1;
    registry.subs.push(SubEntry { id, kind, scope, observer });
    id
  }

  /// Remove a subscription. Returns `false` if the id was not present.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut registry = self.inner.lock();
    let before = registry.subs.len();
    registry.subs.retain(|s| s.id != id);
    registry.subs.len() != before
  }

  /// Deliver `event` to every current subscriber for its kind and title
  /// scope. The registry lock is released before the first delivery, so
  /// observers may themselves (un)subscribe.
  pub fn publish(&self, event: &Event) {
    let targets: Vec<(SubscriptionId, Arc<dyn Observer>)> = {
      let registry = self.inner.lock();
      registry
        .subs
        .iter()
        .filter(|s| s.kind == event.kind() && s.scope.covers(event.title_id()))
        .map(|s| (s.id, Arc::clone(&s.observer)))
        .collect()
    };

    for (id, observer) in targets {
      if let Err(error) = observer.deliver(event) {
        tracing::warn!(subscription = id, %error, "observer delivery failed");
      }
    }
  }
}
