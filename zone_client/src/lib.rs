//! `zone_client`
//!
//! Client-side systems:
//! - Connection to the relay and the single-threaded event loop
//! - Remote entity store keyed by peer id
//! - Interpolation/extrapolation of remote poses every render frame
//! - Deferred, de-duplicated model and label assignment
//! - Tick driver decoupling broadcast rate from render rate
//! - Local input to local pose

pub mod assets;
pub mod client;
pub mod input;
pub mod interp;
pub mod store;
pub mod tick;
pub mod world;

pub use client::GameClient;
pub use world::ClientWorld;
