use reqwest::StatusCode;
use thiserror::Error;

/// Error types for calls to the bank's member API
#[derive(Debug, Error)]
pub(crate) enum BankClientError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("bank rejected request with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}
