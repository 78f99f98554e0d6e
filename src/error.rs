use thiserror::Error;

/// Errors surfaced synchronously by the tracker before any cookie state is
/// recomputed or any beacon is sent.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("out of range: {0}")]
    OutOfRange(String),
    #[error("internal consistency error: {0}")]
    Internal(String),
}

impl TrackerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange(message.into())
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
