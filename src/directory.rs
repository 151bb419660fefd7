use async_trait::async_trait;
use sqlx::SqlitePool;
use std::fmt::Debug;
use tracing::debug;
use uuid::Uuid;

use crate::indexer::db::{find_active_registration, find_latest_registration};
use crate::indexer::models::AddressRegistration;

/// Resolves chain addresses to the bank accounts they are linked to
#[async_trait]
pub(crate) trait AddressDirectory: Send + Sync + Debug {
    /// Bank account of the latest registration of `address`, active or not
    async fn resolve(&self, address: &str) -> Result<Option<Uuid>, sqlx::Error>;

    /// Bank account of the latest active registration of `address`
    async fn resolve_active(&self, address: &str) -> Result<Option<Uuid>, sqlx::Error>;
}

/// [`AddressDirectory`] over the `address_registration` table
#[derive(Debug, Clone)]
pub(crate) struct SqliteAddressDirectory {
    pool: SqlitePool,
}

impl SqliteAddressDirectory {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn bank_account(registration: AddressRegistration) -> Uuid {
    debug!(
        uuid = %registration.uuid,
        address = %registration.address,
        active = registration.active,
        registered = %registration.created,
        "Resolved address registration"
    );
    registration.bank_account_uuid.into()
}

#[async_trait]
impl AddressDirectory for SqliteAddressDirectory {
    async fn resolve(&self, address: &str) -> Result<Option<Uuid>, sqlx::Error> {
        if address.is_empty() {
            return Ok(None);
        }
        Ok(find_latest_registration(&self.pool, address)
            .await?
            .map(bank_account))
    }

    async fn resolve_active(&self, address: &str) -> Result<Option<Uuid>, sqlx::Error> {
        if address.is_empty() {
            return Ok(None);
        }
        Ok(find_active_registration(&self.pool, address)
            .await?
            .map(bank_account))
    }
}
