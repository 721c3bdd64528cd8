//! Error types for the bridge

use serde_json::Value;
use thiserror::Error;

use crate::{checkpoint::CheckpointError, reader::SourceError};

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The upstream feed no longer knows the saved cursor
    #[error("Upstream cannot find cursor {cursor:?}")]
    CursorNotFound { cursor: Option<String> },

    #[error("Upstream source error: {0}")]
    Source(#[from] SourceError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The collector answered with something other than 201 or 409
    #[error("Error reporting usage! Response: {status} {}", describe_body(.body))]
    UnexpectedReport { status: u16, body: Option<Value> },

    #[error("No Location header found in the collector response")]
    MissingLocation,

    #[error("Missing collector token")]
    MissingToken,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bridge is already started")]
    AlreadyStarted,

    #[error(transparent)]
    Common(#[from] usage_bridge_common::CommonError),
}

fn describe_body(body: &Option<Value>) -> String {
    body.as_ref().map(Value::to_string).unwrap_or_default()
}
