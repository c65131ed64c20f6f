//! Utility helpers.

pub mod http_client;
