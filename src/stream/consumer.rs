use anyhow::Context;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chain::client::ChainReader;
use crate::frameworks::context::StorageReady;
use crate::indexer::db::{
    find_marker_transfer_by_hash, find_migration_by_hash, find_tx_status_by_hash,
    get_event_stream, insert_event_stream, insert_marker_transfer, insert_migration,
    lock_tx_status_by_hash, set_tx_status, update_event_stream,
};
use crate::indexer::models::{MarkerTransferRecord, MigrationRecord, TxStatusRecord};
use crate::indexer::types::{DbBlockHeight, DbUuid, MarkerTransferStatus, TxStatus, TxType};
use crate::stream::coin_movement::CoinMovementLedger;
use crate::stream::events::{
    EventBatch, Migration, Transfer, MARKER_TRANSFER_EVENT, MIGRATE_EVENT, WASM_EVENT,
};
use crate::stream::source::EventSource;

const NULL_TX_RESPONSE: &str = "Invalid (NULL) transaction response";

/// Settings of one logical event stream
#[derive(Debug, Clone)]
pub(crate) struct StreamSettings {
    pub(crate) stream_id: Uuid,
    /// Height the cursor starts at when the stream has never run
    pub(crate) epoch_height: u64,
    pub(crate) contract_address: String,
    pub(crate) manager_address: String,
    /// Denom of contract transfers that are forwarded to the bank
    pub(crate) dcc_denom: String,
    pub(crate) reconnect_delay: Duration,
}

/// Contract event as seen by the classifier
#[derive(Debug)]
enum ObservedEvent<'a> {
    Migration(&'a Migration),
    Transfer(&'a Transfer),
    Other,
}

/// Consumes the event stream: admits new migrations and bank-bound transfers,
/// reconciles tracked transactions and maintains the coin movement ledger
#[derive(Debug)]
pub(crate) struct EventStreamConsumer {
    pool: SqlitePool,
    chain_reader: Arc<dyn ChainReader>,
    source: Arc<dyn EventSource>,
    ledger: CoinMovementLedger,
    settings: StreamSettings,
}

impl EventStreamConsumer {
    pub(crate) fn new(
        pool: SqlitePool,
        chain_reader: Arc<dyn ChainReader>,
        source: Arc<dyn EventSource>,
        ledger: CoinMovementLedger,
        settings: StreamSettings,
    ) -> Self {
        Self {
            pool,
            chain_reader,
            source,
            ledger,
            settings,
        }
    }

    fn event_types() -> Vec<String> {
        [WASM_EVENT, MARKER_TRANSFER_EVENT, MIGRATE_EVENT]
            .iter()
            .map(|t| t.to_string())
            .collect()
    }

    /// Stream batches from the stored cursor until the stream ends or fails.
    ///
    /// The cursor is created at the epoch height on the first run and advanced after
    /// every fully handled batch.
    pub(crate) async fn consume_event_stream(&self) -> anyhow::Result<()> {
        let stream_id = DbUuid::from(self.settings.stream_id);
        let stream = match get_event_stream(&self.pool, &stream_id).await? {
            Some(stream) => stream,
            None => {
                let epoch = DbBlockHeight::try_from(self.settings.epoch_height)?;
                insert_event_stream(&self.pool, &stream_id, epoch).await?
            }
        };

        let from_height = u64::from(stream.last_block_height) + 1;
        info!(
            stream_id = %stream.uuid,
            from_height,
            created = %stream.created,
            last_updated = %stream.updated,
            "Starting event stream"
        );

        let mut batches = self.source.open_stream(Self::event_types(), from_height);
        while let Some(batch) = batches.recv().await {
            let batch = batch.context("event stream failed")?;
            self.handle_batch(&batch)
                .await
                .with_context(|| format!("failed to handle block {}", batch.height))?;
            update_event_stream(&self.pool, &stream_id, DbBlockHeight::try_from(batch.height)?)
                .await?;
        }

        info!(%stream_id, "Event stream closed");
        Ok(())
    }

    async fn handle_batch(&self, batch: &EventBatch) -> anyhow::Result<()> {
        let contract = self.settings.contract_address.as_str();
        let mints = batch.mints(contract);
        let transfers = batch.transfers(contract);

        self.handle_events(batch, &transfers).await?;
        self.ledger
            .record_block(batch.height, &mints, &transfers, &batch.marker_transfers())
            .await?;
        Ok(())
    }

    /// Admit or reconcile every contract event of a batch.
    pub(crate) async fn handle_events(
        &self,
        batch: &EventBatch,
        transfers: &[Transfer],
    ) -> anyhow::Result<()> {
        let contract = self.settings.contract_address.as_str();
        let migrations = batch.migrations(contract);

        let events = batch
            .mints(contract)
            .into_iter()
            .map(|e| (e.tx_hash, TxType::MintContract, ObservedEvent::Other))
            .chain(
                batch
                    .burns(contract)
                    .into_iter()
                    .map(|e| (e.tx_hash, TxType::BurnContract, ObservedEvent::Other)),
            )
            .chain(
                batch
                    .redemptions(contract)
                    .into_iter()
                    .map(|e| (e.tx_hash, TxType::RedeemContract, ObservedEvent::Other)),
            )
            .chain(transfers.iter().map(|e| {
                (
                    e.tx_hash.clone(),
                    TxType::TransferContract,
                    ObservedEvent::Transfer(e),
                )
            }))
            .chain(migrations.iter().map(|e| {
                (
                    e.tx_hash.clone(),
                    TxType::Migration,
                    ObservedEvent::Migration(e),
                )
            }));

        for (tx_hash, tx_type, event) in events {
            info!(%tx_hash, %tx_type, height = batch.height, "Event stream found tx");

            match find_tx_status_by_hash(&self.pool, &tx_hash).await? {
                Some(record) => self.reconcile(record).await?,
                None => match event {
                    ObservedEvent::Migration(migration) => {
                        if find_migration_by_hash(&self.pool, &tx_hash).await?.is_none() {
                            self.handle_migration_event(migration).await?;
                        }
                    }
                    ObservedEvent::Transfer(transfer) if self.is_bank_bound(transfer) => {
                        if find_marker_transfer_by_hash(&self.pool, &tx_hash)
                            .await?
                            .is_none()
                        {
                            self.handle_transfer_event(transfer).await?;
                        }
                    }
                    _ => {}
                },
            }
        }

        Ok(())
    }

    fn is_bank_bound(&self, transfer: &Transfer) -> bool {
        transfer.recipient == self.settings.manager_address
            && transfer.denom == self.settings.dcc_denom
    }

    /// Whether the chain confirms `tx_hash` as successful. Transport failures propagate
    /// so the batch is retried.
    async fn is_confirmed(&self, tx_hash: &str) -> anyhow::Result<bool> {
        let tx = self
            .chain_reader
            .fetch_transaction(tx_hash)
            .await
            .with_context(|| format!("failed to fetch tx {tx_hash}"))?;

        match tx {
            Some(tx) if !tx.is_failed() => Ok(true),
            Some(tx) => {
                info!(%tx_hash, height = tx.height, raw_log = tx.raw_log(), "Skipping failed transaction");
                Ok(false)
            }
            None => {
                warn!(%tx_hash, "Transaction not found on chain, skipping");
                Ok(false)
            }
        }
    }

    async fn handle_migration_event(&self, migration: &Migration) -> anyhow::Result<()> {
        if !self.is_confirmed(&migration.tx_hash).await? {
            return Ok(());
        }

        let inserted = insert_migration(
            &self.pool,
            &MigrationRecord {
                uuid: DbUuid::new_v4(),
                code_id: migration.code_id.clone(),
                tx_hash: migration.tx_hash.clone(),
                sent: None,
                created: Utc::now(),
            },
        )
        .await?;

        if inserted {
            info!(tx_hash = %migration.tx_hash, code_id = %migration.code_id, "Persisted migration");
        }
        Ok(())
    }

    async fn handle_transfer_event(&self, transfer: &Transfer) -> anyhow::Result<()> {
        if !self.is_confirmed(&transfer.tx_hash).await? {
            return Ok(());
        }

        let now = Utc::now();
        let inserted = insert_marker_transfer(
            &self.pool,
            &MarkerTransferRecord {
                uuid: DbUuid::new_v4(),
                from_address: transfer.sender.clone(),
                to_address: transfer.recipient.clone(),
                denom: transfer.denom.clone(),
                amount: transfer.amount.clone(),
                height: DbBlockHeight::try_from(transfer.height)?,
                tx_hash: transfer.tx_hash.clone(),
                status: MarkerTransferStatus::Inserted,
                created: now,
                updated: now,
            },
        )
        .await?;

        if inserted {
            info!(tx_hash = %transfer.tx_hash, from = %transfer.sender, amount = %transfer.amount, "Persisted received transfer");
        }
        Ok(())
    }

    /// Move a tracked transaction to its terminal status.
    ///
    /// The chain is queried without holding the row; the status is then re-checked
    /// and written under the row lock.
    async fn reconcile(&self, record: TxStatusRecord) -> anyhow::Result<()> {
        match record.status {
            TxStatus::Complete => {
                warn!(uuid = %record.uuid, tx_hash = %record.tx_hash, tx_type = %record.tx_type, "Tx status already complete");
                return Ok(());
            }
            TxStatus::Error => {
                error!(
                    uuid = %record.uuid,
                    tx_hash = %record.tx_hash,
                    tx_type = %record.tx_type,
                    error_message = record.error_message.as_deref().unwrap_or_default(),
                    "Tx status was already error but received again"
                );
                return Ok(());
            }
            TxStatus::Pending | TxStatus::ActionComplete => {}
        }
        debug!(
            uuid = %record.uuid,
            tx_type = %record.tx_type,
            status = %record.status,
            created = %record.created,
            updated = %record.updated,
            "Reconciling tracked tx"
        );

        let (status, error_message) = match self.chain_reader.fetch_transaction(&record.tx_hash).await {
            Ok(Some(tx)) if !tx.is_failed() => (TxStatus::Complete, None),
            Ok(Some(tx)) => {
                error!(tx_hash = %record.tx_hash, raw_log = tx.raw_log(), "Transaction failed");
                (TxStatus::Error, Some(tx.raw_log().to_string()))
            }
            Ok(None) => {
                error!(tx_hash = %record.tx_hash, "{}", NULL_TX_RESPONSE);
                (TxStatus::Error, Some(NULL_TX_RESPONSE.to_string()))
            }
            Err(e) => {
                error!(tx_hash = %record.tx_hash, error = %e, "{}", NULL_TX_RESPONSE);
                (TxStatus::Error, Some(NULL_TX_RESPONSE.to_string()))
            }
        };

        let mut tx = self.pool.begin().await?;
        match lock_tx_status_by_hash(&mut tx, &record.tx_hash).await? {
            Some(locked) if !locked.status.is_terminal() => {
                set_tx_status(&mut tx, &locked.uuid, status, error_message.as_deref()).await?;
                tx.commit().await?;
                info!(uuid = %locked.uuid, tx_hash = %locked.tx_hash, %status, "Reconciled tx status");
            }
            _ => {
                info!(tx_hash = %record.tx_hash, "Tx status reconciled concurrently");
                tx.rollback().await?;
            }
        }

        Ok(())
    }
}

/// Keep the event stream running, reconnecting after a fixed delay whenever it ends
pub(crate) async fn event_stream_supervisor(consumer: Arc<EventStreamConsumer>, ready: StorageReady) {
    ready.wait().await;

    loop {
        match consumer.consume_event_stream().await {
            Ok(()) => warn!("Event stream ended, reconnecting"),
            Err(e) => error!(error = ?e, "Event stream failed, reconnecting"),
        }
        sleep(consumer.settings.reconnect_delay).await;
    }
}
