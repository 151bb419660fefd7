use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bank::client::BankClient;
use crate::bank::errors::BankClientError;
use crate::bank::types::DepositFiatRequest;
use crate::directory::AddressDirectory;
use crate::frameworks::actor::{ActorModel, Directive, ProcessingError};
use crate::indexer::db::{
    advance_marker_transfer_status, claim_pending_marker_transfer, find_pending_marker_transfers,
    release_marker_transfer_claim,
};
use crate::indexer::types::{DbUuid, MarkerTransferStatus};

/// Error types for processing a marker transfer
#[derive(Debug, Error)]
pub(crate) enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("address {0} is not registered")]
    NotRegistered(String),

    #[error("fiat deposit request failed: {0}")]
    Bank(#[from] BankClientError),
}

#[derive(Debug, Clone)]
pub(crate) struct MarkerTransferDirective {
    id: Uuid,
}

impl Directive for MarkerTransferDirective {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug)]
pub(crate) struct MarkerTransferOutcome {
    id: Uuid,
    /// `false` when the transfer was already handled elsewhere
    notified: bool,
}

/// Tells the bank about coin received at the managed address
#[derive(Debug)]
pub(crate) struct MarkerTransferQueue {
    pool: SqlitePool,
    directory: Arc<dyn AddressDirectory>,
    bank_client: Arc<dyn BankClient>,
    num_workers: usize,
    polling_delay: Duration,
    /// How long a claimed transfer is withheld from other workers
    claim_ttl: Duration,
}

impl MarkerTransferQueue {
    pub(crate) fn new(
        pool: SqlitePool,
        directory: Arc<dyn AddressDirectory>,
        bank_client: Arc<dyn BankClient>,
        num_workers: usize,
        polling_delay: Duration,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            pool,
            directory,
            bank_client,
            num_workers,
            polling_delay,
            claim_ttl,
        }
    }

    async fn notify_bank(
        &self,
        id: &DbUuid,
        from_address: &str,
        amount: &str,
    ) -> Result<(), QueueError> {
        let bank_account_uuid = self
            .directory
            .resolve_active(from_address)
            .await?
            .ok_or_else(|| QueueError::NotRegistered(from_address.to_string()))?;

        self.bank_client
            .notify_deposit(&DepositFiatRequest {
                uuid: id.0,
                bank_account_uuid,
                amount: amount.to_string(),
            })
            .await
            .inspect_err(|e| {
                error!(uuid = %id, error = %e, "Sending fiat deposit request to bank failed; it will retry")
            })?;

        Ok(())
    }
}

#[async_trait]
impl ActorModel for MarkerTransferQueue {
    type Directive = MarkerTransferDirective;
    type Outcome = MarkerTransferOutcome;
    type Error = QueueError;

    fn num_workers(&self) -> usize {
        self.num_workers
    }

    fn polling_delay(&self) -> Duration {
        self.polling_delay
    }

    async fn load_messages(&self) -> Result<Vec<MarkerTransferDirective>, QueueError> {
        let ids = find_pending_marker_transfers(&self.pool, Utc::now().timestamp_millis()).await?;
        Ok(ids
            .into_iter()
            .map(|id| MarkerTransferDirective { id: id.into() })
            .collect())
    }

    async fn process_message(
        &self,
        directive: MarkerTransferDirective,
    ) -> Result<MarkerTransferOutcome, QueueError> {
        let id = DbUuid::from(directive.id);
        let now_ms = Utc::now().timestamp_millis();
        let claimed_until_ms = now_ms + self.claim_ttl.as_millis() as i64;

        let Some(transfer) =
            claim_pending_marker_transfer(&self.pool, &id, now_ms, claimed_until_ms).await?
        else {
            return Ok(MarkerTransferOutcome {
                id: directive.id,
                notified: false,
            });
        };

        debug!(uuid = %id, tx_hash = %transfer.tx_hash, height = *transfer.height, denom = %transfer.denom, "Claimed marker transfer");
        if let Err(e) = self
            .notify_bank(&id, &transfer.from_address, &transfer.amount)
            .await
        {
            release_marker_transfer_claim(&self.pool, &id).await?;
            return Err(e);
        }

        let advanced = advance_marker_transfer_status(
            &self.pool,
            &id,
            MarkerTransferStatus::Inserted,
            MarkerTransferStatus::ActionComplete,
        )
        .await?;
        if !advanced {
            warn!(uuid = %id, "Marker transfer changed status while the bank was notified");
        }

        Ok(MarkerTransferOutcome {
            id: directive.id,
            notified: true,
        })
    }

    fn on_message_success(&self, outcome: &MarkerTransferOutcome) {
        if outcome.notified {
            info!(uuid = %outcome.id, "Marker transfer queue successfully processed tx request");
        } else {
            info!(uuid = %outcome.id, "Marker transfer already claimed or processed");
        }
    }

    fn on_message_failure(
        &self,
        directive: &MarkerTransferDirective,
        error: &ProcessingError<QueueError>,
    ) {
        error!(uuid = %directive.id, %error, "Marker transfer queue got error for tx request");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::db::{find_marker_transfer, insert_marker_transfer, test_utils::test_pool};
    use crate::indexer::models::MarkerTransferRecord;
    use crate::indexer::types::DbBlockHeight;
    use crate::stream::coin_movement::test_utils::FakeDirectory;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    /// Bank that records requests and rejects the first `fail_times` of them
    #[derive(Debug, Default)]
    struct FakeBank {
        requests: Mutex<Vec<DepositFiatRequest>>,
        fail_times: Mutex<usize>,
    }

    #[async_trait]
    impl BankClient for FakeBank {
        async fn notify_deposit(&self, request: &DepositFiatRequest) -> Result<(), BankClientError> {
            self.requests.lock().unwrap().push(request.clone());
            let mut fail_times = self.fail_times.lock().unwrap();
            if *fail_times > 0 {
                *fail_times -= 1;
                return Err(BankClientError::Rejected {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: String::new(),
                });
            }
            Ok(())
        }
    }

    async fn setup(
        directory: FakeDirectory,
        bank: FakeBank,
    ) -> (MarkerTransferQueue, Arc<FakeDirectory>, Arc<FakeBank>) {
        let directory = Arc::new(directory);
        let bank = Arc::new(bank);
        let queue = MarkerTransferQueue::new(
            test_pool().await,
            directory.clone(),
            bank.clone(),
            1,
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        (queue, directory, bank)
    }

    async fn pending_transfer(queue: &MarkerTransferQueue, from: &str) -> DbUuid {
        let now = Utc::now();
        let record = MarkerTransferRecord {
            uuid: DbUuid::new_v4(),
            from_address: from.to_string(),
            to_address: "tp1manager".to_string(),
            denom: "omnibus.coin".to_string(),
            amount: "700".to_string(),
            height: DbBlockHeight::from(9),
            tx_hash: format!("TX-{from}"),
            status: MarkerTransferStatus::Inserted,
            created: now,
            updated: now,
        };
        insert_marker_transfer(&queue.pool, &record).await.unwrap();
        record.uuid
    }

    async fn status_of(queue: &MarkerTransferQueue, id: &DbUuid) -> MarkerTransferStatus {
        find_marker_transfer(&queue.pool, id).await.unwrap().unwrap().status
    }

    fn directive(id: DbUuid) -> MarkerTransferDirective {
        MarkerTransferDirective { id: id.into() }
    }

    #[tokio::test]
    async fn test_deposit_notified_and_status_advanced() {
        let (queue, directory, bank) = setup(FakeDirectory::default().link("tp1alice"), FakeBank::default()).await;
        let id = pending_transfer(&queue, "tp1alice").await;

        let loaded = queue.load_messages().await.unwrap();
        assert_eq!(loaded.len(), 1);

        let outcome = queue.process_message(loaded[0].clone()).await.unwrap();
        assert!(outcome.notified);
        assert_eq!(status_of(&queue, &id).await, MarkerTransferStatus::ActionComplete);

        let requests = bank.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].uuid, id.0);
        assert_eq!(requests[0].bank_account_uuid, directory.bank_uuid("tp1alice"));
        assert_eq!(requests[0].amount, "700");
        drop(requests);

        assert!(queue.load_messages().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bank_failure_leaves_transfer_pending() {
        let bank = FakeBank {
            fail_times: Mutex::new(1),
            ..Default::default()
        };
        let (queue, _, bank) = setup(FakeDirectory::default().link("tp1alice"), bank).await;
        let id = pending_transfer(&queue, "tp1alice").await;

        let err = queue.process_message(directive(id)).await.unwrap_err();
        assert!(matches!(err, QueueError::Bank(_)));
        assert_eq!(status_of(&queue, &id).await, MarkerTransferStatus::Inserted);

        // claim released, so the next poll retries with the same request id
        assert_eq!(queue.load_messages().await.unwrap().len(), 1);
        queue.process_message(directive(id)).await.unwrap();
        assert_eq!(status_of(&queue, &id).await, MarkerTransferStatus::ActionComplete);

        let requests = bank.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].uuid, requests[1].uuid);
    }

    #[tokio::test]
    async fn test_unregistered_source_is_an_error() {
        let directory = FakeDirectory {
            inactive: vec!["tp1alice".to_string()],
            ..Default::default()
        }
        .link("tp1alice");
        let (queue, _, bank) = setup(directory, FakeBank::default()).await;
        let id = pending_transfer(&queue, "tp1alice").await;

        let err = queue.process_message(directive(id)).await.unwrap_err();
        assert!(matches!(err, QueueError::NotRegistered(ref a) if a == "tp1alice"));
        assert!(bank.requests.lock().unwrap().is_empty());
        assert_eq!(status_of(&queue, &id).await, MarkerTransferStatus::Inserted);
    }

    #[tokio::test]
    async fn test_claimed_transfer_is_not_processed_twice() {
        let (queue, _, bank) = setup(FakeDirectory::default().link("tp1alice"), FakeBank::default()).await;
        let id = pending_transfer(&queue, "tp1alice").await;

        // another worker holds the claim
        let now_ms = Utc::now().timestamp_millis();
        claim_pending_marker_transfer(&queue.pool, &id, now_ms, now_ms + 60_000)
            .await
            .unwrap()
            .unwrap();

        let outcome = queue.process_message(directive(id)).await.unwrap();
        assert!(!outcome.notified);
        assert!(bank.requests.lock().unwrap().is_empty());
        assert!(queue.load_messages().await.unwrap().is_empty());
    }
}
