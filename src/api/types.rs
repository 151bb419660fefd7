use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::indexer::models::CoinMovementView;
use crate::indexer::types::CoinMovementType;

/// Default page size of the coin movement listing
pub(crate) const DEFAULT_PAGE_LIMIT: i64 = 100;

/// Largest page a client may ask for
pub(crate) const MAX_PAGE_LIMIT: i64 = 1000;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CoinMovementQuery {
    /// Inclusive lower bound on block time
    pub(crate) from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on block time
    pub(crate) to: Option<DateTime<Utc>>,
    pub(crate) offset: Option<i64>,
    pub(crate) limit: Option<i64>,
}

impl CoinMovementQuery {
    pub(crate) fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub(crate) fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CoinMovementEntry {
    /// Bare tx hash when the transaction moved coin once, `<hash>-<index>` otherwise
    pub(crate) tx_id: String,
    pub(crate) from_address: String,
    pub(crate) from_bank_uuid: Option<Uuid>,
    pub(crate) to_address: String,
    pub(crate) to_bank_uuid: Option<Uuid>,
    pub(crate) block_height: u64,
    pub(crate) block_time: DateTime<Utc>,
    pub(crate) amount: String,
    pub(crate) denom: String,
    #[serde(rename = "type")]
    pub(crate) movement_type: CoinMovementType,
}

impl From<CoinMovementView> for CoinMovementEntry {
    fn from(view: CoinMovementView) -> Self {
        let record = view.record;
        let tx_id = match record.legacy_tx_hash {
            Some(legacy) if view.movements_in_tx == 1 => legacy,
            _ => record.tx_hash_v2,
        };

        Self {
            tx_id,
            from_address: record.from_address,
            from_bank_uuid: record.from_addr_bank_uuid.map(Into::into),
            to_address: record.to_address,
            to_bank_uuid: record.to_addr_bank_uuid.map(Into::into),
            block_height: record.block_height.into(),
            block_time: record.block_time,
            amount: record.amount,
            denom: record.denom,
            movement_type: record.movement_type,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CoinMovementList {
    pub(crate) transactions: Vec<CoinMovementEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StreamStatus {
    pub(crate) stream_id: Uuid,
    /// `None` until the stream has run once
    pub(crate) last_block_height: Option<u64>,
}
