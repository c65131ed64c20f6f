//! Database models for livewatch.
//!
//! These models map directly to the database schema.

pub mod broadcaster;
pub mod session;

pub use broadcaster::*;
pub use session::*;
