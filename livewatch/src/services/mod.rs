//! Service layer module.
//!
//! This module provides the service container that wires the worker's
//! components together.

pub mod container;

pub use container::ServiceContainer;
