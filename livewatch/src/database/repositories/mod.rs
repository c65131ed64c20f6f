//! Repository layer for database access.
//!
//! This module implements the Repository Pattern to abstract all database interactions.

pub mod broadcaster;
pub mod session;
pub mod session_tx;

pub use broadcaster::*;
pub use session::*;
pub use session_tx::*;
