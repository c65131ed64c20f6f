//! Health reporting for the worker.

mod liveness;

pub use liveness::{LivenessMarker, LivenessReporter, LivenessStatus};
