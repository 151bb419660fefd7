use thiserror::Error;

use crate::chain::errors::ChainReaderError;

/// Error types that end an event stream
#[derive(Debug, Error)]
pub(crate) enum EventSourceError {
    #[error("node request failed: {0}")]
    Node(#[from] ChainReaderError),

    #[error("JSON parsing failed: {0}")]
    JsonParse(#[from] serde_json::Error),
}
