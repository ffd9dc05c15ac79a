//! circ-engine — the loan & waiting-list engine with notification
//! fan-out.
//!
//! The engine tracks per-copy availability, serializes concurrent
//! borrow/return traffic through per-title critical sections, keeps a
//! FIFO waiting list per title, and fans availability events out to
//! subscribed observers. It is a library-style component: the
//! presentation layer calls [`Engine`] and [`search`] operations
//! in-process and renders the events it subscribed to on
//! [`NotificationCenter`].

pub mod catalog;
pub mod config;
pub mod ledger;
pub mod notify;
pub mod persist;
pub mod search;
pub mod service;
pub mod sweep;
pub mod waitlist;

pub use config::EngineConfig;
pub use notify::{
  Event, EventKind, NotificationCenter, Observer, SubscriptionId, TitleScope,
};
pub use persist::{DeltaSink, MemoryStore, spawn_persister};
pub use service::Engine;
pub use sweep::spawn_sweeper;

#[cfg(test)]
mod tests;
