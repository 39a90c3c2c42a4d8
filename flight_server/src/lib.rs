//! `flight_server`
//!
//! Authoritative state synchronization:
//! - Connection registry (connection handle -> entity id + outbox)
//! - Sync engine (store mutations + broadcast decisions)
//! - Periodic full-sync reconciliation
//!
//! Networking model:
//! - TCP, length-prefixed JSON frames
//! - One dispatch task serializes all state changes

pub mod registry;
pub mod server;
pub mod sync;

pub use server::FlightServer;
pub use sync::{SyncEngine, SyncEvent};
