use chrono::{DateTime, Utc};

use crate::indexer::types::{
    CoinMovementType, DbBlockHeight, DbUuid, MarkerTransferStatus, TxStatus, TxType,
};

/// Durable cursor of a logical event stream
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct EventStream {
    /// Stream identifier
    pub(crate) uuid: DbUuid,
    /// Last block height whose batch was fully handled
    pub(crate) last_block_height: DbBlockHeight,
    pub(crate) created: DateTime<Utc>,
    pub(crate) updated: DateTime<Utc>,
}

/// Status of one on-chain transaction of interest
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TxStatusRecord {
    pub(crate) uuid: DbUuid,
    pub(crate) tx_hash: String,
    pub(crate) tx_type: TxType,
    pub(crate) status: TxStatus,
    /// Chain-supplied diagnostic when `status` is `ERROR`
    pub(crate) error_message: Option<String>,
    pub(crate) created: DateTime<Utc>,
    pub(crate) updated: DateTime<Utc>,
}

/// Value transfer sent to this instance's managed address, awaiting fiat action
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct MarkerTransferRecord {
    pub(crate) uuid: DbUuid,
    pub(crate) from_address: String,
    pub(crate) to_address: String,
    pub(crate) denom: String,
    /// Amount in the denom's smallest unit
    pub(crate) amount: String,
    pub(crate) height: DbBlockHeight,
    pub(crate) tx_hash: String,
    pub(crate) status: MarkerTransferStatus,
    pub(crate) created: DateTime<Utc>,
    pub(crate) updated: DateTime<Utc>,
}

/// Confirmed contract code migration
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct MigrationRecord {
    pub(crate) uuid: DbUuid,
    pub(crate) code_id: String,
    pub(crate) tx_hash: String,
    pub(crate) sent: Option<DateTime<Utc>>,
    pub(crate) created: DateTime<Utc>,
}

/// Append-only ledger entry of a bank-relevant coin movement
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CoinMovementRecord {
    /// `<tx hash>-<index within batch>`
    pub(crate) tx_hash_v2: String,
    /// Bare transaction hash, kept for identifiers issued before `tx_hash_v2`
    pub(crate) legacy_tx_hash: Option<String>,
    pub(crate) from_address: String,
    pub(crate) from_addr_bank_uuid: Option<DbUuid>,
    pub(crate) to_address: String,
    pub(crate) to_addr_bank_uuid: Option<DbUuid>,
    pub(crate) block_height: DbBlockHeight,
    pub(crate) block_time: DateTime<Utc>,
    pub(crate) amount: String,
    pub(crate) denom: String,
    #[sqlx(rename = "type")]
    pub(crate) movement_type: CoinMovementType,
}

/// Coin movement together with the number of ledger rows sharing its legacy hash
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CoinMovementView {
    #[sqlx(flatten)]
    pub(crate) record: CoinMovementRecord,
    pub(crate) movements_in_tx: i64,
}

/// Chain address linked to a bank account
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct AddressRegistration {
    pub(crate) uuid: DbUuid,
    pub(crate) address: String,
    pub(crate) bank_account_uuid: DbUuid,
    pub(crate) active: bool,
    pub(crate) created: DateTime<Utc>,
}
