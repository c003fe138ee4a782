//! `zone_server`
//!
//! Presence relay:
//! - Session registry keyed by transport connection
//! - Fan-out of `join` / `identity` / `move` to the other sessions
//! - Unicast identity reconciliation via `identity.target`
//! - Departure notices on disconnect
//!
//! The relay never interprets pose data; it is a dumb fan-out.

pub mod names;
pub mod relay;
pub mod server;

pub use relay::Relay;
pub use server::RelayServer;
