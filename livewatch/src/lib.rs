//! livewatch library crate.
//!
//! Polls the Twitch Helix API for the live status of registered broadcasters
//! and records each live stretch as a stream session.

pub mod api;
pub mod config;
pub mod credentials;
pub mod database;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
