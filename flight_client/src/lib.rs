//! `flight_client`
//!
//! Client-side systems:
//! - Connection management (framed TCP)
//! - Flight controls producing the locally reported pose
//! - Remote roster reconstruction and full-sync reconciliation

pub mod client;
pub mod flight;
pub mod roster;

pub use client::FlightClient;
