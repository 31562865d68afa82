//! Pallet consolidation and reservation lifecycle engine.
//!
//! Reservations are matched to a pickup -> delivery lane, aggregated on the
//! lane's open pallet, and moved to payment once the pallet fills.

pub mod actor;
pub mod api;
pub mod capacity;
pub mod completion;
pub mod config;
pub mod decisions;
pub mod engine;
pub mod error;
pub mod geocoder;
pub mod models;
pub mod outbox;
pub mod pallets;
pub mod repair;
pub mod reservations;
pub mod schema;
pub mod store;
pub mod sweep;
pub mod zones;

pub use actor::Actor;
pub use engine::{Engine, EngineSettings};
pub use error::{EngineError, EngineResult};
