use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tracing::debug;

use crate::bank::errors::BankClientError;
use crate::bank::types::DepositFiatRequest;

const DEPOSIT_FIAT_PATH: &str = "/bankmember/api/v1/fiat/deposits";

/// Outbound calls to the member bank
#[async_trait]
pub(crate) trait BankClient: Send + Sync + Debug {
    /// Register a fiat deposit with the bank
    async fn notify_deposit(&self, request: &DepositFiatRequest) -> Result<(), BankClientError>;
}

/// [`BankClient`] over the bank's HTTP member API
#[derive(Debug, Clone)]
pub(crate) struct HttpBankClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBankClient {
    pub(crate) fn new(base_url: &str, request_timeout: Duration) -> Result<Self, BankClientError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BankClient for HttpBankClient {
    async fn notify_deposit(&self, request: &DepositFiatRequest) -> Result<(), BankClientError> {
        let url = format!("{}{}", self.base_url, DEPOSIT_FIAT_PATH);
        let resp = self.http.post(&url).json(request).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BankClientError::Rejected { status, body });
        }

        debug!(uuid = %request.uuid, "Bank acknowledged fiat deposit");
        Ok(())
    }
}
