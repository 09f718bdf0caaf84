//! Signaling router for call establishment
//!
//! Multiplexes persistent WebSocket connections into rooms, relays
//! negotiation messages between room members, and hands out time-limited
//! relay credentials on room join.

pub mod error;
pub mod registry;
pub mod router;
pub mod server;

pub use error::{RouterError, RouterResult};
pub use registry::Registry;
pub use router::Router;
pub use server::{app, serve, AppState};
