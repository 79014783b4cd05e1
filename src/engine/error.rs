use thiserror::Error;

use crate::axis::AxisError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid engine settings: {0}")]
    InvalidSettings(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Engine task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Axis(#[from] AxisError),
}
