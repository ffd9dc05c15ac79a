//! Integration tests for the engine against an in-memory setup.

use std::sync::Arc;

use chrono::{Duration, Utc};
use circ_core::{
  Error,
  loan::{CopyId, CopyStatus},
  store::Delta,
  title::NewTitle,
};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
  DeltaSink, Engine, EngineConfig, Event, EventKind, MemoryStore,
  NotificationCenter, Observer, TitleScope,
  search::{AuthorContains, GenreIs, TitleContains, YearBetween},
  spawn_persister,
};

// ─── Fixtures ────────────────────────────────────────────────────────────────

fn engine() -> (Arc<NotificationCenter>, Engine) {
  let center = Arc::new(NotificationCenter::new());
  let engine = Engine::new(
    EngineConfig::default(),
    Arc::clone(&center),
    DeltaSink::disabled(),
  );
  (center, engine)
}

fn dune(engine: &Engine, copies: u32) -> Uuid {
  engine.add_title(NewTitle::new("Dune", "Frank Herbert", "Sci-Fi", 1965), copies)
}

/// Observer that records everything it receives.
#[derive(Default)]
struct Recorder {
  events: Mutex<Vec<Event>>,
}

impl Recorder {
  fn events(&self) -> Vec<Event> {
    self.events.lock().clone()
  }

  fn offers(&self) -> Vec<(Uuid, String)> {
    self
      .events()
      .into_iter()
      .filter_map(|e| match e {
        Event::CopyAvailable { title_id, offered, .. } => {
          Some((title_id, offered))
        }
        _ => None,
      })
      .collect()
  }
}

impl Observer for Recorder {
  fn deliver(
    &self,
    event: &Event,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    self.events.lock().push(event.clone());
    Ok(())
  }
}

fn subscribe_all(center: &NotificationCenter, recorder: &Arc<Recorder>) {
  for kind in [
    EventKind::CopyAvailable,
    EventKind::WaitingPositionChanged,
    EventKind::LoanConfirmed,
    EventKind::ReturnReminder,
  ] {
    center.subscribe(kind, TitleScope::All, Arc::clone(recorder) as _);
  }
}

/// Observer that always refuses delivery.
struct Refuser;

impl Observer for Refuser {
  fn deliver(
    &self,
    _event: &Event,
  ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Err("observer refused".into())
  }
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

#[test]
fn add_title_creates_copies() {
  let (_, engine) = engine();
  let id = dune(&engine, 3);

  assert_eq!(engine.total_count(id).unwrap(), 3);
  assert_eq!(engine.available_count(id).unwrap(), 3);
  assert_eq!(engine.titles().len(), 1);
}

#[test]
fn add_title_merges_identical_identity() {
  let (_, engine) = engine();
  let first = dune(&engine, 1);
  let second = engine.add_title(
    NewTitle::new("dune", "FRANK HERBERT", "sci-fi", 1965),
    2,
  );

  assert_eq!(first, second);
  assert_eq!(engine.titles().len(), 1);
  assert_eq!(engine.total_count(first).unwrap(), 3);
}

#[test]
fn remove_copy_rules() {
  let (_, engine) = engine();
  let id = dune(&engine, 2);

  let loan = engine.borrow(id, "u1", 14).unwrap();
  assert!(matches!(
    engine.remove_copy(loan.copy),
    Err(Error::CopyInUse(_))
  ));

  let free = CopyId { title_id: id, copy_no: 2 };
  engine.remove_copy(free).unwrap();
  assert_eq!(engine.total_count(id).unwrap(), 1);
  assert!(matches!(
    engine.remove_copy(free),
    Err(Error::UnknownCopy(_))
  ));
}

#[test]
fn removing_last_copy_keeps_title_queryable() {
  let (_, engine) = engine();
  let id = dune(&engine, 1);
  engine.borrow(id, "u1", 14).unwrap();
  engine.return_copy(CopyId { title_id: id, copy_no: 1 }).unwrap();
  engine.remove_copy(CopyId { title_id: id, copy_no: 1 }).unwrap();

  assert_eq!(engine.total_count(id).unwrap(), 0);
  assert_eq!(engine.title(id).unwrap().title, "Dune");
  assert_eq!(engine.history_for_title(id).unwrap().len(), 1);
}

// ─── Lending ─────────────────────────────────────────────────────────────────

#[test]
fn borrow_then_return_restores_availability() {
  let (_, engine) = engine();
  let id = dune(&engine, 2);

  let loan = engine.borrow(id, "u1", 14).unwrap();
  assert_eq!(engine.available_count(id).unwrap(), 1);
  assert!(loan.is_active());
  assert_eq!(engine.active_loan(loan.copy).unwrap().unwrap().loan_id, loan.loan_id);

  let returned = engine.return_copy(loan.copy).unwrap();
  assert_eq!(returned.loan_id, loan.loan_id);
  assert!(!returned.is_active());
  assert_eq!(engine.available_count(id).unwrap(), 2);
  assert!(engine.active_loan(loan.copy).unwrap().is_none());
}

#[test]
fn borrow_unknown_title_errors() {
  let (_, engine) = engine();
  assert!(matches!(
    engine.borrow(Uuid::new_v4(), "u1", 14),
    Err(Error::UnknownTitle(_))
  ));
}

#[test]
fn borrow_with_no_copies_errors() {
  let (_, engine) = engine();
  let id = dune(&engine, 1);
  engine.borrow(id, "u1", 14).unwrap();

  assert!(matches!(
    engine.borrow(id, "u2", 14),
    Err(Error::NoCopyAvailable(_))
  ));
}

#[test]
fn double_return_errors() {
  let (_, engine) = engine();
  let id = dune(&engine, 1);
  let loan = engine.borrow(id, "u1", 14).unwrap();
  engine.return_copy(loan.copy).unwrap();

  assert!(matches!(
    engine.return_copy(loan.copy),
    Err(Error::NoActiveLoan(_))
  ));
}

#[test]
fn ledger_reads() {
  let (_, engine) = engine();
  let id = dune(&engine, 1);

  for _ in 0..2 {
    let loan = engine.borrow(id, "u1", 14).unwrap();
    engine.return_copy(loan.copy).unwrap();
  }
  let open = engine.borrow(id, "u1", 14).unwrap();

  assert_eq!(engine.total_borrows(id).unwrap(), 3);
  assert_eq!(engine.history_for_title(id).unwrap().len(), 3);
  assert_eq!(engine.history_for_user("u1").len(), 3);

  let active = engine.loans_for_user("u1");
  assert_eq!(active.len(), 1);
  assert_eq!(active[0].loan_id, open.loan_id);
}

// ─── Waiting list & offers ───────────────────────────────────────────────────

#[test]
fn waitlist_scenario_single_copy() {
  let (center, engine) = engine();
  let recorder = Arc::new(Recorder::default());
  subscribe_all(&center, &recorder);

  let id = dune(&engine, 1);
  engine.borrow(id, "u1", 14).unwrap();
  assert_eq!(engine.available_count(id).unwrap(), 0);

  assert!(matches!(
    engine.borrow(id, "u2", 14),
    Err(Error::NoCopyAvailable(_))
  ));
  assert_eq!(engine.join_waitlist(id, "u2").unwrap(), 1);

  engine.return_copy(CopyId { title_id: id, copy_no: 1 }).unwrap();

  // The freed copy is held for u2, not generally available.
  assert_eq!(recorder.offers(), vec![(id, "u2".to_owned())]);
  assert_eq!(engine.available_count(id).unwrap(), 0);
  assert!(engine.position(id, "u2").unwrap().is_none());
  assert!(matches!(
    engine.borrow(id, "u3", 14),
    Err(Error::NoCopyAvailable(_))
  ));

  // u2 confirms; the copy goes straight back on loan.
  engine.borrow(id, "u2", 14).unwrap();
  assert_eq!(engine.available_count(id).unwrap(), 0);
}

#[test]
fn fifo_offer_goes_to_longest_waiter() {
  let (center, engine) = engine();
  let recorder = Arc::new(Recorder::default());
  subscribe_all(&center, &recorder);

  let id = dune(&engine, 1);
  engine.borrow(id, "u1", 14).unwrap();
  engine.join_waitlist(id, "a").unwrap();
  engine.join_waitlist(id, "b").unwrap();

  engine.return_copy(CopyId { title_id: id, copy_no: 1 }).unwrap();

  assert_eq!(recorder.offers(), vec![(id, "a".to_owned())]);
  // b moved up to rank 1.
  assert_eq!(engine.position(id, "b").unwrap(), Some(1));
  assert!(recorder.events().iter().any(|e| matches!(
    e,
    Event::WaitingPositionChanged { user, new_position: 1, .. } if user == "b"
  )));
}

#[test]
fn join_twice_errors() {
  let (_, engine) = engine();
  let id = dune(&engine, 0);

  engine.join_waitlist(id, "u1").unwrap();
  assert!(matches!(
    engine.join_waitlist(id, "u1"),
    Err(Error::AlreadyWaiting { .. })
  ));
}

#[test]
fn reservation_holder_counts_as_waiting() {
  let (_, engine) = engine();
  let id = dune(&engine, 1);
  engine.borrow(id, "u1", 14).unwrap();
  engine.join_waitlist(id, "u2").unwrap();
  engine.return_copy(CopyId { title_id: id, copy_no: 1 }).unwrap();

  // u2 now holds the reservation; re-joining is still a duplicate.
  assert!(matches!(
    engine.join_waitlist(id, "u2"),
    Err(Error::AlreadyWaiting { .. })
  ));
}

#[test]
fn leave_waitlist_is_idempotent() {
  let (_, engine) = engine();
  let id = dune(&engine, 0);

  engine.join_waitlist(id, "u1").unwrap();
  engine.leave_waitlist(id, "u1").unwrap();
  engine.leave_waitlist(id, "u1").unwrap();
  assert!(engine.position(id, "u1").unwrap().is_none());
}

#[test]
fn withdrawal_by_reservation_holder_reoffers() {
  let (center, engine) = engine();
  let recorder = Arc::new(Recorder::default());
  subscribe_all(&center, &recorder);

  let id = dune(&engine, 1);
  engine.borrow(id, "u1", 14).unwrap();
  engine.join_waitlist(id, "u2").unwrap();
  engine.join_waitlist(id, "u3").unwrap();
  engine.return_copy(CopyId { title_id: id, copy_no: 1 }).unwrap();

  engine.leave_waitlist(id, "u2").unwrap();

  assert_eq!(recorder.offers(), vec![
    (id, "u2".to_owned()),
    (id, "u3".to_owned()),
  ]);
  assert!(engine.position(id, "u3").unwrap().is_none());
}

#[test]
fn withdrawal_shifts_ranks_behind_the_leaver() {
  let (center, engine) = engine();
  let recorder = Arc::new(Recorder::default());
  subscribe_all(&center, &recorder);

  let id = dune(&engine, 0);
  engine.join_waitlist(id, "a").unwrap();
  engine.join_waitlist(id, "b").unwrap();
  engine.join_waitlist(id, "c").unwrap();

  engine.leave_waitlist(id, "b").unwrap();

  assert_eq!(engine.position(id, "a").unwrap(), Some(1));
  assert_eq!(engine.position(id, "c").unwrap(), Some(2));
  assert!(recorder.events().iter().any(|e| matches!(
    e,
    Event::WaitingPositionChanged { user, new_position: 2, .. } if user == "c"
  )));
}

// ─── Reservation expiry ──────────────────────────────────────────────────────

#[test]
fn expired_reservation_reoffers_next_waiter() {
  let (center, engine) = engine();
  let recorder = Arc::new(Recorder::default());
  subscribe_all(&center, &recorder);

  let id = dune(&engine, 1);
  engine.borrow(id, "u1", 14).unwrap();
  engine.join_waitlist(id, "u2").unwrap();
  engine.join_waitlist(id, "u3").unwrap();
  engine.return_copy(CopyId { title_id: id, copy_no: 1 }).unwrap();

  // u2 never confirms; past the deadline the hold passes to u3.
  let lapsed = engine.expire_reservations(Utc::now() + Duration::hours(49));
  assert_eq!(lapsed, vec![CopyId { title_id: id, copy_no: 1 }]);
  assert_eq!(recorder.offers(), vec![
    (id, "u2".to_owned()),
    (id, "u3".to_owned()),
  ]);

  // u3's hold lapses too, with nobody left the copy frees up.
  let lapsed = engine.expire_reservations(Utc::now() + Duration::hours(98));
  assert_eq!(lapsed.len(), 1);
  assert_eq!(engine.available_count(id).unwrap(), 1);
}

#[test]
fn unexpired_reservation_survives_the_sweep() {
  let (_, engine) = engine();
  let id = dune(&engine, 1);
  engine.borrow(id, "u1", 14).unwrap();
  engine.join_waitlist(id, "u2").unwrap();
  engine.return_copy(CopyId { title_id: id, copy_no: 1 }).unwrap();

  assert!(engine.expire_reservations(Utc::now()).is_empty());
  // Still claimable by the offered user.
  engine.borrow(id, "u2", 14).unwrap();
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[test]
fn failing_observer_does_not_stop_fanout() {
  let (center, engine) = engine();
  center.subscribe(EventKind::LoanConfirmed, TitleScope::All, Arc::new(Refuser));
  let recorder = Arc::new(Recorder::default());
  center.subscribe(
    EventKind::LoanConfirmed,
    TitleScope::All,
    Arc::clone(&recorder) as _,
  );

  let id = dune(&engine, 1);
  engine.borrow(id, "u1", 14).unwrap();

  assert_eq!(recorder.events().len(), 1);
}

#[test]
fn title_scope_filters_events() {
  let (center, engine) = engine();
  let id = dune(&engine, 1);
  let other = engine.add_title(
    NewTitle::new("Foundation", "Isaac Asimov", "Sci-Fi", 1951),
    1,
  );

  let recorder = Arc::new(Recorder::default());
  center.subscribe(
    EventKind::LoanConfirmed,
    TitleScope::Title(id),
    Arc::clone(&recorder) as _,
  );

  engine.borrow(other, "u1", 14).unwrap();
  assert!(recorder.events().is_empty());

  engine.borrow(id, "u1", 14).unwrap();
  assert_eq!(recorder.events().len(), 1);
}

#[test]
fn unsubscribe_stops_delivery() {
  let (center, engine) = engine();
  let recorder = Arc::new(Recorder::default());
  let sub = center.subscribe(
    EventKind::LoanConfirmed,
    TitleScope::All,
    Arc::clone(&recorder) as _,
  );

  let id = dune(&engine, 1);
  assert!(center.unsubscribe(sub));
  assert!(!center.unsubscribe(sub));

  engine.borrow(id, "u1", 14).unwrap();
  assert!(recorder.events().is_empty());
}

#[test]
fn due_reminder_fires_once_per_loan() {
  let (center, engine) = engine();
  let recorder = Arc::new(Recorder::default());
  subscribe_all(&center, &recorder);

  let id = dune(&engine, 1);
  engine.borrow(id, "u1", 1).unwrap();

  let now = Utc::now();
  assert_eq!(engine.publish_due_reminders(now), 1);
  assert_eq!(engine.publish_due_reminders(now), 0);

  let reminders = recorder
    .events()
    .into_iter()
    .filter(|e| matches!(e, Event::ReturnReminder { .. }))
    .count();
  assert_eq!(reminders, 1);
}

// ─── Search ──────────────────────────────────────────────────────────────────

#[test]
fn search_yields_catalog_insertion_order() {
  let (_, engine) = engine();
  let dune_id = dune(&engine, 1);
  let messiah = engine.add_title(
    NewTitle::new("Dune Messiah", "Frank Herbert", "Sci-Fi", 1969),
    1,
  );
  engine.add_title(NewTitle::new("Emma", "Jane Austen", "Romance", 1815), 1);

  let hits: Vec<_> = engine
    .search(TitleContains("dune".into()))
    .map(|t| t.title_id)
    .collect();
  assert_eq!(hits, vec![dune_id, messiah]);

  assert_eq!(engine.search(AuthorContains("austen".into())).count(), 1);
  assert_eq!(engine.search(GenreIs("sci-fi".into())).count(), 2);
  assert_eq!(engine.search(YearBetween(1960, 1970)).count(), 2);
}

// ─── Snapshot & persistence ──────────────────────────────────────────────────

#[test]
fn snapshot_round_trips_through_from_snapshot() {
  let (_, engine) = engine();
  let id = dune(&engine, 2);
  let loan = engine.borrow(id, "u1", 14).unwrap();
  engine.borrow(id, "u2", 14).unwrap();
  engine.join_waitlist(id, "u3").unwrap();
  engine.join_waitlist(id, "u4").unwrap();

  let restored = Engine::from_snapshot(
    EngineConfig::default(),
    engine.snapshot(),
    Arc::new(NotificationCenter::new()),
    DeltaSink::disabled(),
  )
  .unwrap();

  assert_eq!(restored.total_count(id).unwrap(), 2);
  assert_eq!(restored.available_count(id).unwrap(), 0);
  assert_eq!(restored.position(id, "u3").unwrap(), Some(1));
  assert_eq!(restored.position(id, "u4").unwrap(), Some(2));
  assert!(restored.active_loan(loan.copy).unwrap().is_some());
  assert_eq!(restored.total_borrows(id).unwrap(), 2);
}

#[test]
fn from_snapshot_rejects_status_drift() {
  let (_, engine) = engine();
  dune(&engine, 1);
  let mut snapshot = engine.snapshot();

  // Claim the copy is on loan while the ledger shows no active loan.
  snapshot.copies[0].status = CopyStatus::OnLoan;

  let result = Engine::from_snapshot(
    EngineConfig::default(),
    snapshot,
    Arc::new(NotificationCenter::new()),
    DeltaSink::disabled(),
  );
  assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
}

#[tokio::test]
async fn persister_drains_committed_deltas() {
  let (sink, rx) = DeltaSink::channel();
  let engine =
    Engine::new(EngineConfig::default(), Arc::new(NotificationCenter::new()), sink);

  let id = dune(&engine, 1);
  let loan = engine.borrow(id, "u1", 14).unwrap();
  engine.return_copy(loan.copy).unwrap();
  drop(engine);

  let store = Arc::new(MemoryStore::new());
  spawn_persister(Arc::clone(&store), rx).await.unwrap();

  let deltas = store.deltas();
  assert!(matches!(deltas[0], Delta::TitleAdded(_)));
  assert!(deltas.iter().any(|d| matches!(d, Delta::LoanRecorded(_))));
  assert!(deltas.iter().any(|d| matches!(d, Delta::ReturnRecorded(_))));
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

#[test]
fn concurrent_borrowing_never_overallocates() {
  let (_, engine) = engine();
  let id = dune(&engine, 3);

  std::thread::scope(|scope| {
    for worker in 0..8 {
      let engine = &engine;
      scope.spawn(move || {
        let user = format!("u{worker}");
        for _ in 0..50 {
          let available = engine.available_count(id).unwrap();
          assert!(available <= 3);
          if let Ok(loan) = engine.borrow(id, &user, 14) {
            engine.return_copy(loan.copy).unwrap();
          }
        }
      });
    }
  });

  assert_eq!(engine.available_count(id).unwrap(), 3);
  assert!(engine.history_for_title(id).unwrap().iter().all(|l| !l.is_active()));
}
