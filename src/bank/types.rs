use serde::Serialize;
use uuid::Uuid;

/// Notice to the bank that coin was deposited for one of its members
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct DepositFiatRequest {
    /// Request identifier, stable across retries of the same deposit
    pub(crate) uuid: Uuid,
    #[serde(rename = "bankAccountUUID")]
    pub(crate) bank_account_uuid: Uuid,
    /// Amount in the coin's smallest unit
    pub(crate) amount: String,
}
