use anyhow::Context;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::chain::client::ChainReader;
use crate::directory::AddressDirectory;
use crate::indexer::db::insert_coin_movement;
use crate::indexer::models::CoinMovementRecord;
use crate::indexer::types::{CoinMovementType, DbBlockHeight};
use crate::stream::events::{MarkerTransfer, Mint, Transfer};

/// Movement that passed the bank-linkage filters, before its block time is known
#[derive(Debug)]
struct AdmittedMovement<'a> {
    tx_hash: &'a str,
    height: u64,
    from_address: &'a str,
    from_bank_uuid: Option<Uuid>,
    to_address: &'a str,
    to_bank_uuid: Option<Uuid>,
    amount: &'a str,
    denom: &'a str,
    movement_type: CoinMovementType,
}

/// Append-only ledger of coin moving between chain addresses and bank accounts
#[derive(Debug, Clone)]
pub(crate) struct CoinMovementLedger {
    pool: SqlitePool,
    chain_reader: Arc<dyn ChainReader>,
    directory: Arc<dyn AddressDirectory>,
    /// Address that receives coin being redeemed back to the bank
    manager_address: String,
    /// Denom of marker transfers tracked by the ledger
    bank_denom: String,
}

impl CoinMovementLedger {
    pub(crate) fn new(
        pool: SqlitePool,
        chain_reader: Arc<dyn ChainReader>,
        directory: Arc<dyn AddressDirectory>,
        manager_address: &str,
        bank_denom: &str,
    ) -> Self {
        Self {
            pool,
            chain_reader,
            directory,
            manager_address: manager_address.to_string(),
            bank_denom: bank_denom.to_string(),
        }
    }

    /// Record the bank-relevant movements of one block.
    ///
    /// Contract transfers to the manager address are recorded as burns. Admitted
    /// movements share one index sequence across mints, burns and transfers, in that
    /// order. Replaying a block leaves the ledger unchanged. Returns the number of
    /// rows written.
    pub(crate) async fn record_block(
        &self,
        height: u64,
        mints: &[Mint],
        burns: &[Transfer],
        transfers: &[MarkerTransfer],
    ) -> anyhow::Result<u64> {
        let mut admitted = Vec::new();

        // on ramp: coin minted for a bank member into a linked address
        for mint in mints
            .iter()
            .filter(|m| !m.withdraw_address.is_empty() && !m.member_id.is_empty())
        {
            debug!(tx_hash = %mint.tx_hash, member_id = %mint.member_id, withdraw_address = %mint.withdraw_address, amount = %mint.amount, "Mint");
            if let Some(to_bank_uuid) = self.directory.resolve(&mint.withdraw_address).await? {
                admitted.push(AdmittedMovement {
                    tx_hash: &mint.tx_hash,
                    height: mint.height,
                    from_address: &mint.member_id,
                    from_bank_uuid: None,
                    to_address: &mint.withdraw_address,
                    to_bank_uuid: Some(to_bank_uuid),
                    amount: &mint.amount,
                    denom: &mint.withdraw_denom,
                    movement_type: CoinMovementType::Mint,
                });
            }
        }

        // off ramp: linked address sends coin to the manager to redeem it
        for burn in burns
            .iter()
            .filter(|b| !b.sender.is_empty() && !b.recipient.is_empty())
        {
            debug!(tx_hash = %burn.tx_hash, sender = %burn.sender, recipient = %burn.recipient, amount = %burn.amount, "Contract transfer");
            if burn.recipient != self.manager_address {
                continue;
            }
            if let Some(from_bank_uuid) = self.directory.resolve(&burn.sender).await? {
                admitted.push(AdmittedMovement {
                    tx_hash: &burn.tx_hash,
                    height: burn.height,
                    from_address: &burn.sender,
                    from_bank_uuid: Some(from_bank_uuid),
                    to_address: &burn.recipient,
                    to_bank_uuid: None,
                    amount: &burn.amount,
                    denom: &burn.denom,
                    movement_type: CoinMovementType::Burn,
                });
            }
        }

        for transfer in transfers.iter().filter(|t| {
            !t.from_address.is_empty() && !t.to_address.is_empty() && t.denom == self.bank_denom
        }) {
            debug!(tx_hash = %transfer.tx_hash, from = %transfer.from_address, to = %transfer.to_address, amount = %transfer.amount, "Marker transfer");
            let from_bank_uuid = self.directory.resolve(&transfer.from_address).await?;
            let to_bank_uuid = self.directory.resolve(&transfer.to_address).await?;
            if from_bank_uuid.is_none() && to_bank_uuid.is_none() {
                continue;
            }
            admitted.push(AdmittedMovement {
                tx_hash: &transfer.tx_hash,
                height: transfer.height,
                from_address: &transfer.from_address,
                from_bank_uuid,
                to_address: &transfer.to_address,
                to_bank_uuid,
                amount: &transfer.amount,
                denom: &transfer.denom,
                movement_type: CoinMovementType::Transfer,
            });
        }

        if admitted.is_empty() {
            return Ok(0);
        }

        let block = self
            .chain_reader
            .fetch_block(height)
            .await
            .with_context(|| format!("failed to fetch block {height}"))?;
        debug!(height = block.height, time = %block.time, "Fetched block time");

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for (index, movement) in admitted.into_iter().enumerate() {
            let record = CoinMovementRecord {
                tx_hash_v2: format!("{}-{}", movement.tx_hash, index),
                legacy_tx_hash: Some(movement.tx_hash.to_string()),
                from_address: movement.from_address.to_string(),
                from_addr_bank_uuid: movement.from_bank_uuid.map(Into::into),
                to_address: movement.to_address.to_string(),
                to_addr_bank_uuid: movement.to_bank_uuid.map(Into::into),
                block_height: DbBlockHeight::try_from(movement.height)?,
                block_time: block.time,
                amount: movement.amount.to_string(),
                denom: movement.denom.to_string(),
                movement_type: movement.movement_type,
            };
            if insert_coin_movement(&mut tx, &record).await? {
                inserted += 1;
            } else {
                debug!(tx_hash_v2 = %record.tx_hash_v2, "Coin movement already recorded");
            }
        }
        tx.commit().await?;

        if inserted > 0 {
            info!(height, inserted, "Recorded coin movements");
        }
        Ok(inserted)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::chain::errors::ChainReaderError;
    use crate::chain::types::{BlockHeader, TxResponse, TxResultInfo};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Chain whose transactions are looked up from a fixed table of result codes
    #[derive(Debug, Default)]
    pub(crate) struct FakeChain {
        /// tx hash to (code, log); a hash not present is unknown to the chain
        pub(crate) txs: Mutex<HashMap<String, (u32, String)>>,
        pub(crate) unreachable: bool,
        pub(crate) block_fetches: AtomicUsize,
        pub(crate) tx_fetches: AtomicUsize,
    }

    impl FakeChain {
        pub(crate) fn with_tx(self, hash: &str, code: u32, log: &str) -> Self {
            self.txs
                .lock()
                .unwrap()
                .insert(hash.to_string(), (code, log.to_string()));
            self
        }

        pub(crate) fn tx_fetches(&self) -> usize {
            self.tx_fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainReader for FakeChain {
        async fn fetch_block(&self, height: u64) -> Result<BlockHeader, ChainReaderError> {
            self.block_fetches.fetch_add(1, Ordering::SeqCst);
            Ok(BlockHeader {
                height,
                time: Utc.with_ymd_and_hms(2022, 3, 4, 5, 6, 7).unwrap(),
            })
        }

        async fn fetch_transaction(
            &self,
            tx_hash: &str,
        ) -> Result<Option<TxResponse>, ChainReaderError> {
            self.tx_fetches.fetch_add(1, Ordering::SeqCst);
            if self.unreachable {
                return Err(ChainReaderError::Malformed("connection refused".to_string()));
            }
            Ok(self.txs.lock().unwrap().get(tx_hash).map(|(code, log)| TxResponse {
                hash: tx_hash.to_string(),
                height: 50,
                tx_result: TxResultInfo {
                    code: *code,
                    log: log.clone(),
                },
            }))
        }
    }

    /// Directory backed by a fixed address to bank account table
    #[derive(Debug, Default)]
    pub(crate) struct FakeDirectory {
        pub(crate) linked: HashMap<String, Uuid>,
        pub(crate) inactive: Vec<String>,
    }

    impl FakeDirectory {
        pub(crate) fn link(mut self, address: &str) -> Self {
            self.linked.insert(address.to_string(), Uuid::new_v4());
            self
        }

        pub(crate) fn bank_uuid(&self, address: &str) -> Uuid {
            self.linked[address]
        }
    }

    #[async_trait]
    impl AddressDirectory for FakeDirectory {
        async fn resolve(&self, address: &str) -> Result<Option<Uuid>, sqlx::Error> {
            Ok(self.linked.get(address).copied())
        }

        async fn resolve_active(&self, address: &str) -> Result<Option<Uuid>, sqlx::Error> {
            if self.inactive.iter().any(|a| a == address) {
                return Ok(None);
            }
            self.resolve(address).await
        }
    }
}
