use sqlx::{
    sqlite::{SqliteTypeInfo, SqliteValueRef},
    Decode, Encode, Sqlite, Type,
};
use std::{fmt::Display, ops::Deref, str::FromStr};
use uuid::Uuid;

/// UUID stored in its hyphenated text form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct DbUuid(pub(crate) Uuid);

impl DbUuid {
    pub(crate) fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Deref for DbUuid {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Uuid> for DbUuid {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<DbUuid> for Uuid {
    fn from(db: DbUuid) -> Self {
        db.0
    }
}

impl Display for DbUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Type<Sqlite> for DbUuid {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }
}

impl<'r> Decode<'r, Sqlite> for DbUuid {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let s: String = Decode::<'r, Sqlite>::decode(value)?;
        Ok(DbUuid(Uuid::parse_str(&s)?))
    }
}

impl<'q> Encode<'q, Sqlite> for DbUuid {
    fn encode_by_ref(
        &self,
        buf: &mut <Sqlite as sqlx::Database>::ArgumentBuffer<'q>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Encode::<Sqlite>::encode_by_ref(&self.0.hyphenated().to_string(), buf)
    }
}

/// ───── Block height ────────────────────────────────────────────────────
/// SQLite's INTEGER is signed i64, so wrap that.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Type)]
#[sqlx(transparent)]
pub(crate) struct DbBlockHeight(i64);

impl Deref for DbBlockHeight {
    type Target = i64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for DbBlockHeight {
    type Error = std::num::TryFromIntError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value).map(Self)
    }
}

impl From<i64> for DbBlockHeight {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<DbBlockHeight> for u64 {
    fn from(value: DbBlockHeight) -> Self {
        value.0 as u64
    }
}

/// Stores a fieldless enum as its `Display` text and reads it back through `FromStr`.
macro_rules! sqlite_text_enum {
    ($name:ident) => {
        impl Type<Sqlite> for $name {
            fn type_info() -> SqliteTypeInfo {
                <String as Type<Sqlite>>::type_info()
            }
        }

        impl<'r> Decode<'r, Sqlite> for $name {
            fn decode(
                value: SqliteValueRef<'r>,
            ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
                let s: String = Decode::<'r, Sqlite>::decode(value)?;
                Ok($name::from_str(&s)?)
            }
        }

        impl<'q> Encode<'q, Sqlite> for $name {
            fn encode_by_ref(
                &self,
                buf: &mut <Sqlite as sqlx::Database>::ArgumentBuffer<'q>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                Encode::<Sqlite>::encode_by_ref(&self.to_string(), buf)
            }
        }
    };
}

/// Lifecycle of a tracked on-chain transaction.
///
/// `Complete` and `Error` are terminal: once reached, later observations of the
/// same transaction never change the record again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum TxStatus {
    Pending,
    ActionComplete,
    Complete,
    Error,
}

impl TxStatus {
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Complete | TxStatus::Error)
    }
}

impl Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxStatus::Pending => "PENDING",
            TxStatus::ActionComplete => "ACTION_COMPLETE",
            TxStatus::Complete => "COMPLETE",
            TxStatus::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TxStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TxStatus::Pending),
            "ACTION_COMPLETE" => Ok(TxStatus::ActionComplete),
            "COMPLETE" => Ok(TxStatus::Complete),
            "ERROR" => Ok(TxStatus::Error),
            _ => Err(anyhow::anyhow!("Unknown tx status: {}", s)),
        }
    }
}

sqlite_text_enum!(TxStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TxType {
    MintContract,
    BurnContract,
    RedeemContract,
    TransferContract,
    Migration,
}

impl Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxType::MintContract => "MINT_CONTRACT",
            TxType::BurnContract => "BURN_CONTRACT",
            TxType::RedeemContract => "REDEEM_CONTRACT",
            TxType::TransferContract => "TRANSFER_CONTRACT",
            TxType::Migration => "MIGRATION",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TxType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINT_CONTRACT" => Ok(TxType::MintContract),
            "BURN_CONTRACT" => Ok(TxType::BurnContract),
            "REDEEM_CONTRACT" => Ok(TxType::RedeemContract),
            "TRANSFER_CONTRACT" => Ok(TxType::TransferContract),
            "MIGRATION" => Ok(TxType::Migration),
            _ => Err(anyhow::anyhow!("Unknown tx type: {}", s)),
        }
    }
}

sqlite_text_enum!(TxType);

/// Progress of a bank-directed transfer. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MarkerTransferStatus {
    Inserted,
    ActionComplete,
    TxnComplete,
}

impl Display for MarkerTransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MarkerTransferStatus::Inserted => "INSERTED",
            MarkerTransferStatus::ActionComplete => "ACTION_COMPLETE",
            MarkerTransferStatus::TxnComplete => "TXN_COMPLETE",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for MarkerTransferStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERTED" => Ok(MarkerTransferStatus::Inserted),
            "ACTION_COMPLETE" => Ok(MarkerTransferStatus::ActionComplete),
            "TXN_COMPLETE" => Ok(MarkerTransferStatus::TxnComplete),
            _ => Err(anyhow::anyhow!("Unknown marker transfer status: {}", s)),
        }
    }
}

sqlite_text_enum!(MarkerTransferStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum CoinMovementType {
    Mint,
    Burn,
    Transfer,
}

impl Display for CoinMovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CoinMovementType::Mint => "MINT",
            CoinMovementType::Burn => "BURN",
            CoinMovementType::Transfer => "TRANSFER",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for CoinMovementType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MINT" => Ok(CoinMovementType::Mint),
            "BURN" => Ok(CoinMovementType::Burn),
            "TRANSFER" => Ok(CoinMovementType::Transfer),
            _ => Err(anyhow::anyhow!("Unknown coin movement type: {}", s)),
        }
    }
}

sqlite_text_enum!(CoinMovementType);
