use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Subset of a block header used by the ledger
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BlockHeader {
    #[serde(deserialize_with = "from_str_u64")]
    pub(crate) height: u64,
    pub(crate) time: DateTime<Utc>,
}

/// Result of a transaction that made it into a block
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TxResponse {
    pub(crate) hash: String,
    #[serde(deserialize_with = "from_str_u64")]
    pub(crate) height: u64,
    pub(crate) tx_result: TxResultInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TxResultInfo {
    /// Zero on success, the module's error code otherwise
    #[serde(default)]
    pub(crate) code: u32,
    /// Raw log; carries the failure reason when `code != 0`
    #[serde(default)]
    pub(crate) log: String,
}

impl TxResponse {
    pub(crate) fn is_failed(&self) -> bool {
        self.tx_result.code != 0
    }

    pub(crate) fn raw_log(&self) -> &str {
        &self.tx_result.log
    }
}

/// Node RPC encodes 64-bit integers as strings
pub(crate) fn from_str_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    s.parse::<u64>().map_err(serde::de::Error::custom)
}
