use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::params::ObjectParams;
use jsonrpsee::http_client::HttpClient;
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::chain::errors::ChainReaderError;
use crate::chain::types::from_str_u64;
use crate::stream::errors::EventSourceError;
use crate::stream::events::{EventBatch, StreamEvent};
use crate::utils::rpc_client::create_rpc_client;

/// Batches delivered by an open stream. An `Err` is always the last item.
pub(crate) type BatchReceiver = mpsc::Receiver<Result<EventBatch, EventSourceError>>;

/// Batches are produced ahead of the consumer by at most this many heights
const STREAM_BUFFER: usize = 16;

const TX_SEARCH_PAGE_SIZE: u64 = 100;

/// Supplier of ordered per-block event batches
pub(crate) trait EventSource: Send + Sync + Debug {
    /// Start streaming batches of the given event types from `from_height` upward.
    ///
    /// Batches arrive in ascending height order; the stream ends after the first error.
    fn open_stream(&self, event_types: Vec<String>, from_height: u64) -> BatchReceiver;
}

#[derive(Debug, Deserialize)]
struct TxSearchResult {
    txs: Vec<TxSearchEntry>,
    #[serde(deserialize_with = "from_str_u64")]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
struct TxSearchEntry {
    hash: String,
    #[serde(deserialize_with = "from_str_u64")]
    height: u64,
    tx_result: TxSearchEvents,
}

#[derive(Debug, Default, Deserialize)]
struct TxSearchEvents {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    attributes: Vec<RawAttribute>,
}

#[derive(Debug, Deserialize)]
struct RawAttribute {
    key: String,
    #[serde(default)]
    value: Option<String>,
}

/// [`EventSource`] that polls the node's JSON-RPC for new blocks and searches each
/// height's transactions for events
#[derive(Debug, Clone)]
pub(crate) struct RpcEventSource {
    client: HttpClient,
    poll_interval: Duration,
}

impl RpcEventSource {
    pub(crate) fn new(rpc_url: &str, poll_interval: Duration) -> Result<Self, ChainReaderError> {
        Ok(Self {
            client: create_rpc_client(rpc_url)?,
            poll_interval,
        })
    }

    async fn latest_height(&self) -> Result<u64, EventSourceError> {
        let status: Value = self
            .client
            .request("status", ObjectParams::new())
            .await
            .map_err(ChainReaderError::from)?;
        let height = status
            .pointer("/sync_info/latest_block_height")
            .and_then(Value::as_str)
            .and_then(|h| h.parse::<u64>().ok())
            .ok_or_else(|| {
                ChainReaderError::Malformed("status has no latest_block_height".to_string())
            })?;
        Ok(height)
    }

    async fn fetch_batch(
        &self,
        height: u64,
        event_types: &[String],
    ) -> Result<EventBatch, EventSourceError> {
        let mut events = Vec::new();
        let mut seen = 0;
        let mut page = 1u64;

        loop {
            let mut params = ObjectParams::new();
            params.insert("query", format!("tx.height={height}"))?;
            params.insert("prove", false)?;
            params.insert("page", page.to_string())?;
            params.insert("per_page", TX_SEARCH_PAGE_SIZE.to_string())?;
            params.insert("order_by", "asc")?;
            let result: TxSearchResult = self
                .client
                .request("tx_search", params)
                .await
                .map_err(ChainReaderError::from)?;

            let page_len = result.txs.len() as u64;
            seen += page_len;

            for tx in result.txs {
                for event in tx.tx_result.events {
                    if !event_types.contains(&event.event_type) {
                        continue;
                    }
                    events.push(StreamEvent {
                        event_type: event.event_type,
                        tx_hash: tx.hash.clone(),
                        height: tx.height,
                        attributes: event
                            .attributes
                            .into_iter()
                            .map(|a| (a.key, a.value.unwrap_or_default()))
                            .collect(),
                    });
                }
            }

            if page_len == 0 || seen >= result.total_count {
                break;
            }
            page += 1;
        }

        Ok(EventBatch { height, events })
    }

    async fn stream_batches(
        &self,
        event_types: Vec<String>,
        mut next_height: u64,
        tx: mpsc::Sender<Result<EventBatch, EventSourceError>>,
    ) {
        loop {
            let latest = match self.latest_height().await {
                Ok(latest) => latest,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            while next_height <= latest {
                let batch = self.fetch_batch(next_height, &event_types).await;
                let failed = batch.is_err();
                if tx.send(batch).await.is_err() {
                    debug!("Event stream receiver dropped");
                    return;
                }
                if failed {
                    error!(height = next_height, "Event stream ended with error");
                    return;
                }
                next_height += 1;
            }

            if tx.is_closed() {
                debug!("Event stream receiver dropped at chain head");
                return;
            }
            sleep(self.poll_interval).await;
        }
    }
}

impl EventSource for RpcEventSource {
    fn open_stream(&self, event_types: Vec<String>, from_height: u64) -> BatchReceiver {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let source = self.clone();

        info!(from_height, ?event_types, "Opening event stream");
        tokio::spawn(async move {
            source.stream_batches(event_types, from_height, tx).await;
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::{MARKER_TRANSFER_EVENT, WASM_EVENT};
    use crate::utils::rpc_client::test_utils::rpc_result;
    use mockito::{Matcher, Request, Server};
    use serde_json::json;

    fn status_body(height: u64) -> impl Fn(&Request) -> Vec<u8> + Send + Sync + 'static {
        rpc_result(json!({ "sync_info": { "latest_block_height": height.to_string() } }))
    }

    fn tx_search_body(txs: Value, total: u64) -> impl Fn(&Request) -> Vec<u8> + Send + Sync + 'static {
        rpc_result(json!({ "txs": txs, "total_count": total.to_string() }))
    }

    fn event_types() -> Vec<String> {
        vec![WASM_EVENT.to_string(), MARKER_TRANSFER_EVENT.to_string()]
    }

    #[tokio::test]
    async fn test_stream_delivers_filtered_batches_in_order() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "status" })))
            .with_header("content-type", "application/json")
            .with_body_from_request(status_body(11))
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "tx_search",
                "params": { "query": "tx.height=10" }
            })))
            .with_header("content-type", "application/json")
            .with_body_from_request(tx_search_body(
                json!([{
                    "hash": "AAAA",
                    "height": "10",
                    "tx_result": {
                        "code": 0,
                        "events": [
                            { "type": "message", "attributes": [{ "key": "action", "value": "x" }] },
                            { "type": "wasm", "attributes": [
                                { "key": "_contract_address", "value": "tp1contract" },
                                { "key": "action", "value": "mint" },
                                { "key": "memo", "value": null }
                            ]}
                        ]
                    }
                }]),
                1,
            ))
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "tx_search",
                "params": { "query": "tx.height=11" }
            })))
            .with_header("content-type", "application/json")
            .with_body_from_request(tx_search_body(json!([]), 0))
            .create_async()
            .await;

        let source = RpcEventSource::new(&server.url(), Duration::from_secs(60)).unwrap();
        let mut rx = source.open_stream(event_types(), 10);

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.height, 10);
        assert_eq!(first.events.len(), 1);
        assert_eq!(first.events[0].event_type, WASM_EVENT);
        assert_eq!(first.events[0].tx_hash, "AAAA");
        assert_eq!(first.events[0].attributes[2], ("memo".to_string(), String::new()));

        // heights without events still produce a batch
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(second.height, 11);
        assert!(second.events.is_empty());
    }

    #[tokio::test]
    async fn test_tx_search_follows_pages() {
        let mut server = Server::new_async().await;
        let tx = |hash: &str| {
            json!({
                "hash": hash,
                "height": "5",
                "tx_result": { "events": [{ "type": "wasm", "attributes": [] }] }
            })
        };
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "params": { "page": "1" } })))
            .with_header("content-type", "application/json")
            .with_body_from_request(tx_search_body(json!([tx("P1")]), 2))
            .create_async()
            .await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "params": { "page": "2" } })))
            .with_header("content-type", "application/json")
            .with_body_from_request(tx_search_body(json!([tx("P2")]), 2))
            .create_async()
            .await;

        let source = RpcEventSource::new(&server.url(), Duration::from_secs(60)).unwrap();
        let batch = source.fetch_batch(5, &event_types()).await.unwrap();

        let hashes: Vec<_> = batch.events.iter().map(|e| e.tx_hash.as_str()).collect();
        assert_eq!(hashes, vec!["P1", "P2"]);
    }

    #[tokio::test]
    async fn test_transport_failure_ends_stream() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(500)
            .create_async()
            .await;

        let source = RpcEventSource::new(&server.url(), Duration::from_secs(60)).unwrap();
        let mut rx = source.open_stream(event_types(), 1);

        assert!(rx.recv().await.unwrap().is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_stops_polling_once_receiver_is_dropped() {
        let mut server = Server::new_async().await;
        let status = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "status" })))
            .with_header("content-type", "application/json")
            .with_body_from_request(status_body(3))
            .expect_at_most(2)
            .create_async()
            .await;

        // the source is ahead of the chain head, so it only polls `status`
        let source = RpcEventSource::new(&server.url(), Duration::from_millis(10)).unwrap();
        let rx = source.open_stream(event_types(), 10);
        drop(rx);

        sleep(Duration::from_millis(200)).await;
        status.assert_async().await;
    }
}
