//! Error definitions for the axis core

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AxisError {
    #[error("Invalid range [{min}, {max}]")]
    InvalidRange { min: f64, max: f64 },

    #[error("Bounds update [{min}, {max}] for axis '{axis}' would cross")]
    CrossingBounds { axis: String, min: f64, max: f64 },

    #[error("Unknown axis index {0}")]
    UnknownAxis(usize),

    #[error("Invariant violated on axis '{axis}': {detail}")]
    InvariantViolation { axis: String, detail: String },
}
