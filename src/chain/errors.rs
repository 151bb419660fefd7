use jsonrpsee::core::ClientError;
use thiserror::Error;

/// Error types for talking to the chain node
#[derive(Debug, Error)]
pub(crate) enum ChainReaderError {
    #[error("RPC request failed: {0}")]
    Client(ClientError),

    #[error("JSON parsing failed: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("RPC error {code}: {message} {data}")]
    Rpc {
        code: i32,
        message: String,
        data: String,
    },

    #[error("Malformed RPC payload: {0}")]
    Malformed(String),
}

impl From<ClientError> for ChainReaderError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::Call(err) => ChainReaderError::Rpc {
                code: err.code(),
                message: err.message().to_string(),
                // string data arrives JSON quoted
                data: err
                    .data()
                    .map(|raw| {
                        serde_json::from_str::<String>(raw.get())
                            .unwrap_or_else(|_| raw.get().to_string())
                    })
                    .unwrap_or_default(),
            },
            other => ChainReaderError::Client(other),
        }
    }
}

impl ChainReaderError {
    /// Whether the node reported that the requested item does not exist
    pub(crate) fn is_not_found(&self) -> bool {
        match self {
            ChainReaderError::Rpc { message, data, .. } => {
                data.contains("not found") || message.contains("not found")
            }
            _ => false,
        }
    }
}
