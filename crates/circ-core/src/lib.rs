//! Core types and trait definitions for the circ circulation engine.
//!
//! This crate is deliberately free of locking and runtime dependencies.
//! All other crates depend on it; it depends on nothing heavier than
//! chrono and serde.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod loan;
pub mod store;
pub mod title;
pub mod waitlist;

pub use error::{Error, Result};
