//! `flight_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - One authoritative data model for replicated vehicles.
//! - Clear separation of concerns (entity, store, net, config, math).
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod math;
pub mod net;
pub mod store;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::entity::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::store::*;
}
