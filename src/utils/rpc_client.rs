use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use std::time::Duration;
use std::{fmt, future::Future};
use tokio::time::sleep;
use tracing::warn;

use super::retry_policy::ExponentialBackoff;

/// Creates a JSON-RPC HTTP client for the node endpoint
///
/// The client keeps a connection pool, applies a 30-second request timeout so a
/// stalled node cannot hang the caller, and caps requests at 10MB.
pub(crate) fn create_rpc_client(rpc_url: &str) -> Result<HttpClient, ClientError> {
    HttpClientBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .max_request_size(10 * 1024 * 1024) // 10MB
        .build(rpc_url)
}

/// Execute an async operation with exponential backoff retry logic
pub(crate) async fn execute_with_retries<F, Fut, T, E>(
    operation: F,
    operation_name: &str,
    retry_policy: ExponentialBackoff,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < retry_policy.max_retries() => {
                attempt += 1;
                let delay = retry_policy.get_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_retries = retry_policy.max_retries(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying..."
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
