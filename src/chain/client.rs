use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::http_client::HttpClient;
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;
use tracing::debug;

use crate::chain::errors::ChainReaderError;
use crate::chain::types::{BlockHeader, TxResponse};
use crate::utils::{
    retry_policy::ExponentialBackoff,
    rpc_client::{create_rpc_client, execute_with_retries},
};

/// Read access to finalized chain data
#[async_trait]
pub(crate) trait ChainReader: Send + Sync + Debug {
    /// Header of the block at `height`
    async fn fetch_block(&self, height: u64) -> Result<BlockHeader, ChainReaderError>;

    /// Confirmed result of a transaction, or `None` if the chain does not know it
    async fn fetch_transaction(&self, tx_hash: &str)
        -> Result<Option<TxResponse>, ChainReaderError>;
}

/// [`ChainReader`] over the node's JSON-RPC endpoint
#[derive(Debug, Clone)]
pub(crate) struct RpcChainReader {
    client: HttpClient,
    retry_policy: ExponentialBackoff,
}

impl RpcChainReader {
    pub(crate) fn new(rpc_url: &str, max_retries: u64) -> Result<Self, ChainReaderError> {
        Ok(Self {
            client: create_rpc_client(rpc_url)?,
            retry_policy: ExponentialBackoff::new(max_retries, Duration::from_secs(10), 1.5),
        })
    }

    async fn request(&self, method: &str, params: ObjectParams) -> Result<Value, ChainReaderError> {
        Ok(self.client.request(method, params).await?)
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn fetch_block(&self, height: u64) -> Result<BlockHeader, ChainReaderError> {
        let result = execute_with_retries(
            || async move {
                let mut params = ObjectParams::new();
                params.insert("height", height.to_string())?;
                self.request("block", params).await
            },
            "fetch block",
            self.retry_policy,
        )
        .await?;

        let header = result
            .get("block")
            .and_then(|block| block.get("header"))
            .cloned()
            .ok_or_else(|| ChainReaderError::Malformed(format!("block {height} has no header")))?;

        Ok(serde_json::from_value(header)?)
    }

    async fn fetch_transaction(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TxResponse>, ChainReaderError> {
        // JSON-RPC takes byte params base64 encoded
        let hash_bytes = hex::decode(tx_hash.trim_start_matches("0x"))
            .map_err(|e| ChainReaderError::Malformed(format!("invalid tx hash {tx_hash}: {e}")))?;
        let mut params = ObjectParams::new();
        params.insert("hash", Base64::encode_string(&hash_bytes))?;
        params.insert("prove", false)?;

        match self.request("tx", params).await {
            Ok(result) => {
                let tx: TxResponse = serde_json::from_value(result)?;
                debug!(hash = %tx.hash, height = tx.height, code = tx.tx_result.code, "Fetched transaction");
                Ok(Some(tx))
            }
            Err(e) if e.is_not_found() => {
                debug!(%tx_hash, "Transaction not found on chain");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
