//! `zone_shared`
//!
//! Shared libraries used by both client and relay.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (net, math, sanitize, config).
//! - Untrusted input is validated or sanitized at the boundary.
//! - No `unsafe`.

pub mod config;
pub mod math;
pub mod net;
pub mod sanitize;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::sanitize::*;
}
