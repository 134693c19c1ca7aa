//! Model validation errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid bitrate: {0}")]
    InvalidBitrate(String),

    #[error("Invalid source URL: {0}")]
    InvalidSourceUrl(String),

    #[error("Invalid destination prefix: {0}")]
    InvalidDestination(String),

    #[error("Missing correlation id")]
    MissingCorrelationId,

    #[error("Invalid quality ladder: {0}")]
    InvalidLadder(String),

    #[error("Illegal job transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
}

impl ModelError {
    pub fn invalid_bitrate(value: impl Into<String>) -> Self {
        Self::InvalidBitrate(value.into())
    }

    pub fn invalid_ladder(msg: impl Into<String>) -> Self {
        Self::InvalidLadder(msg.into())
    }
}
