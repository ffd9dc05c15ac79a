//! Decoupled persistence — the delta channel and its drain task.
//!
//! The engine never touches the record store on the hot path: each
//! committed transition pushes a [`Delta`] into an unbounded channel and
//! moves on. A background task drains the channel into the store.

use std::{convert::Infallible, sync::Arc};

use circ_core::store::{Delta, RecordStore, Snapshot};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

// ─── Sink ────────────────────────────────────────────────────────────────────

/// Engine-side handle for emitting deltas.
#[derive(Clone)]
pub struct DeltaSink {
  tx: Option<UnboundedSender<Delta>>,
}

impl DeltaSink {
  /// A sink wired to a receiver, for [`spawn_persister`].
  pub fn channel() -> (Self, UnboundedReceiver<Delta>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx: Some(tx) }, rx)
  }

  /// A sink that drops every delta — for ephemeral engines and tests.
  pub fn disabled() -> Self { Self { tx: None } }

  pub(crate) fn send(&self, delta: Delta) {
    let Some(tx) = &self.tx else { return };
    if tx.send(delta).is_err() {
      tracing::warn!("persistence channel closed; delta dropped");
    }
  }
}

/// Drain `rx` into `store` until the engine side closes. Store failures
/// are logged and skipped — the transition they describe has already
/// committed.
pub fn spawn_persister<S>(
  store: Arc<S>,
  mut rx: UnboundedReceiver<Delta>,
) -> tokio::task::JoinHandle<()>
where
  S: RecordStore + 'static,
{
  tokio::spawn(async move {
    while let Some(delta) = rx.recv().await {
      if let Err(error) = store.persist(delta).await {
        tracing::warn!(%error, "record store rejected delta");
      }
    }
  })
}

// ─── Memory store ────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryInner {
  snapshot: Snapshot,
  deltas:   Vec<Delta>,
}

/// In-memory [`RecordStore`] — the reference implementation used by
/// tests and by deployments that bolt real persistence on elsewhere.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<MemoryInner>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  /// A store that will serve `snapshot` from [`RecordStore::load`].
  pub fn with_snapshot(snapshot: Snapshot) -> Self {
    Self {
      inner: Mutex::new(MemoryInner { snapshot, deltas: Vec::new() }),
    }
  }

  /// Every delta persisted so far, in commit order.
  pub fn deltas(&self) -> Vec<Delta> {
    self.inner.lock().deltas.clone()
  }
}

impl RecordStore for MemoryStore {
  type Error = Infallible;

  async fn load(&self) -> Result<Snapshot, Self::Error> {
    Ok(self.inner.lock().snapshot.clone())
  }

  async fn persist(&self, delta: Delta) -> Result<(), Self::Error> {
    self.inner.lock().deltas.push(delta);
    Ok(())
  }
}
