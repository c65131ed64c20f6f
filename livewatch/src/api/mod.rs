//! HTTP surface of the worker: the liveness probe.

pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
