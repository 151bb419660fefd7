use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqliteConnection, SqlitePool};
use std::time::Duration;

use crate::indexer::models::{
    AddressRegistration, CoinMovementRecord, CoinMovementView, EventStream, MarkerTransferRecord,
    MigrationRecord, TxStatusRecord,
};
use crate::indexer::types::{DbBlockHeight, DbUuid, MarkerTransferStatus, TxStatus};

/// Initialize the SQLite connection pool.
pub(crate) async fn init_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Runs all necessary migrations for the indexer.
pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Get the cursor of an event stream, if the stream has run before.
pub(crate) async fn get_event_stream(
    pool: &SqlitePool,
    uuid: &DbUuid,
) -> Result<Option<EventStream>, sqlx::Error> {
    sqlx::query_as::<_, EventStream>(
        r#"
        SELECT uuid, last_block_height, created, updated
        FROM event_stream
        WHERE uuid = ?1
        "#,
    )
    .bind(uuid)
    .fetch_optional(pool)
    .await
}

/// Create the cursor of an event stream at its epoch height.
///
/// A concurrent first run that already created the row wins; its cursor is returned.
pub(crate) async fn insert_event_stream(
    pool: &SqlitePool,
    uuid: &DbUuid,
    epoch_height: DbBlockHeight,
) -> Result<EventStream, sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO event_stream (uuid, last_block_height, created, updated)
        VALUES (?1, ?2, ?3, ?3)
        "#,
    )
    .bind(uuid)
    .bind(epoch_height)
    .bind(now)
    .execute(pool)
    .await?;

    get_event_stream(pool, uuid)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Advance the cursor of an event stream.
pub(crate) async fn update_event_stream(
    pool: &SqlitePool,
    uuid: &DbUuid,
    last_block_height: DbBlockHeight,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE event_stream
        SET last_block_height = ?1, updated = ?2
        WHERE uuid = ?3
        "#,
    )
    .bind(last_block_height)
    .bind(Utc::now())
    .bind(uuid)
    .execute(pool)
    .await?;
    Ok(())
}

const TX_STATUS_COLUMNS: &str =
    "uuid, tx_hash, tx_type, status, error_message, created, updated";

/// Fetch the status record of a transaction by its hash.
pub(crate) async fn find_tx_status_by_hash(
    pool: &SqlitePool,
    tx_hash: &str,
) -> Result<Option<TxStatusRecord>, sqlx::Error> {
    sqlx::query_as::<_, TxStatusRecord>(&format!(
        "SELECT {TX_STATUS_COLUMNS} FROM tx_status WHERE tx_hash = ?1"
    ))
    .bind(tx_hash)
    .fetch_optional(pool)
    .await
}

/// Read a transaction status record for update within the caller's transaction.
///
/// SQLite has no row locks. Touching the row first takes the database write lock,
/// which is then held until the surrounding transaction commits or rolls back.
pub(crate) async fn lock_tx_status_by_hash(
    conn: &mut SqliteConnection,
    tx_hash: &str,
) -> Result<Option<TxStatusRecord>, sqlx::Error> {
    sqlx::query("UPDATE tx_status SET updated = updated WHERE tx_hash = ?1")
        .bind(tx_hash)
        .execute(&mut *conn)
        .await?;

    sqlx::query_as::<_, TxStatusRecord>(&format!(
        "SELECT {TX_STATUS_COLUMNS} FROM tx_status WHERE tx_hash = ?1"
    ))
    .bind(tx_hash)
    .fetch_optional(&mut *conn)
    .await
}

/// Set the status of a transaction record.
pub(crate) async fn set_tx_status(
    conn: &mut SqliteConnection,
    uuid: &DbUuid,
    status: TxStatus,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE tx_status
        SET status = ?1, error_message = ?2, updated = ?3
        WHERE uuid = ?4
        "#,
    )
    .bind(status)
    .bind(error_message)
    .bind(Utc::now())
    .bind(uuid)
    .execute(conn)
    .await?;
    Ok(())
}

/// Insert a transaction status record. Status rows are created by the request flows
/// that submit transactions; the event pipeline only reconciles them.
#[cfg(test)]
pub(crate) async fn insert_tx_status(
    pool: &SqlitePool,
    record: &TxStatusRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO tx_status (uuid, tx_hash, tx_type, status, error_message, created, updated)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(record.uuid)
    .bind(&record.tx_hash)
    .bind(record.tx_type)
    .bind(record.status)
    .bind(&record.error_message)
    .bind(record.created)
    .bind(record.updated)
    .execute(pool)
    .await?;
    Ok(())
}

const MARKER_TRANSFER_COLUMNS: &str =
    "uuid, from_address, to_address, denom, amount, height, tx_hash, status, created, updated";

/// Fetch a marker transfer by transaction hash.
pub(crate) async fn find_marker_transfer_by_hash(
    pool: &SqlitePool,
    tx_hash: &str,
) -> Result<Option<MarkerTransferRecord>, sqlx::Error> {
    sqlx::query_as::<_, MarkerTransferRecord>(&format!(
        "SELECT {MARKER_TRANSFER_COLUMNS} FROM marker_transfer WHERE tx_hash = ?1"
    ))
    .bind(tx_hash)
    .fetch_optional(pool)
    .await
}

/// Fetch a marker transfer by id.
#[cfg(test)]
pub(crate) async fn find_marker_transfer(
    pool: &SqlitePool,
    uuid: &DbUuid,
) -> Result<Option<MarkerTransferRecord>, sqlx::Error> {
    sqlx::query_as::<_, MarkerTransferRecord>(&format!(
        "SELECT {MARKER_TRANSFER_COLUMNS} FROM marker_transfer WHERE uuid = ?1"
    ))
    .bind(uuid)
    .fetch_optional(pool)
    .await
}

/// Insert a marker transfer. Returns `false` when one already exists for the hash.
pub(crate) async fn insert_marker_transfer(
    pool: &SqlitePool,
    record: &MarkerTransferRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO marker_transfer
            (uuid, from_address, to_address, denom, amount, height, tx_hash, status, created, updated)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(record.uuid)
    .bind(&record.from_address)
    .bind(&record.to_address)
    .bind(&record.denom)
    .bind(&record.amount)
    .bind(record.height)
    .bind(&record.tx_hash)
    .bind(record.status)
    .bind(record.created)
    .bind(record.updated)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Ids of marker transfers awaiting bank notification and not claimed by any worker.
pub(crate) async fn find_pending_marker_transfers(
    pool: &SqlitePool,
    now_ms: i64,
) -> Result<Vec<DbUuid>, sqlx::Error> {
    sqlx::query_scalar::<_, DbUuid>(
        r#"
        SELECT uuid FROM marker_transfer
        WHERE status = ?1 AND (claimed_until IS NULL OR claimed_until < ?2)
        ORDER BY height, created
        "#,
    )
    .bind(MarkerTransferStatus::Inserted)
    .bind(now_ms)
    .fetch_all(pool)
    .await
}

/// Atomically claim a pending marker transfer until `claimed_until_ms`.
///
/// Returns `None` when the transfer is no longer pending or another worker holds an
/// unexpired claim on it.
pub(crate) async fn claim_pending_marker_transfer(
    pool: &SqlitePool,
    uuid: &DbUuid,
    now_ms: i64,
    claimed_until_ms: i64,
) -> Result<Option<MarkerTransferRecord>, sqlx::Error> {
    sqlx::query_as::<_, MarkerTransferRecord>(&format!(
        r#"
        UPDATE marker_transfer
        SET claimed_until = ?1
        WHERE uuid = ?2 AND status = ?3 AND (claimed_until IS NULL OR claimed_until < ?4)
        RETURNING {MARKER_TRANSFER_COLUMNS}
        "#
    ))
    .bind(claimed_until_ms)
    .bind(uuid)
    .bind(MarkerTransferStatus::Inserted)
    .bind(now_ms)
    .fetch_optional(pool)
    .await
}

/// Advance a marker transfer's status and drop its claim.
///
/// Only applies when the transfer is still in `from`; returns whether it did.
pub(crate) async fn advance_marker_transfer_status(
    pool: &SqlitePool,
    uuid: &DbUuid,
    from: MarkerTransferStatus,
    to: MarkerTransferStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE marker_transfer
        SET status = ?1, claimed_until = NULL, updated = ?2
        WHERE uuid = ?3 AND status = ?4
        "#,
    )
    .bind(to)
    .bind(Utc::now())
    .bind(uuid)
    .bind(from)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Drop a worker's claim without changing the transfer's status.
pub(crate) async fn release_marker_transfer_claim(
    pool: &SqlitePool,
    uuid: &DbUuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE marker_transfer SET claimed_until = NULL WHERE uuid = ?1")
        .bind(uuid)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fetch a migration by transaction hash.
pub(crate) async fn find_migration_by_hash(
    pool: &SqlitePool,
    tx_hash: &str,
) -> Result<Option<MigrationRecord>, sqlx::Error> {
    sqlx::query_as::<_, MigrationRecord>(
        r#"
        SELECT uuid, code_id, tx_hash, sent, created
        FROM migration
        WHERE tx_hash = ?1
        "#,
    )
    .bind(tx_hash)
    .fetch_optional(pool)
    .await
}

/// Insert a migration. Returns `false` when one already exists for the hash.
pub(crate) async fn insert_migration(
    pool: &SqlitePool,
    record: &MigrationRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO migration (uuid, code_id, tx_hash, sent, created)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(record.uuid)
    .bind(&record.code_id)
    .bind(&record.tx_hash)
    .bind(record.sent)
    .bind(record.created)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Append a coin movement to the ledger.
///
/// Re-inserting an existing `tx_hash_v2` is a no-op and returns `false`.
pub(crate) async fn insert_coin_movement(
    conn: &mut SqliteConnection,
    record: &CoinMovementRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO coin_movement
            (tx_hash_v2, legacy_tx_hash, from_address, from_addr_bank_uuid, to_address,
             to_addr_bank_uuid, block_height, block_time, amount, denom, type, created)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&record.tx_hash_v2)
    .bind(&record.legacy_tx_hash)
    .bind(&record.from_address)
    .bind(record.from_addr_bank_uuid)
    .bind(&record.to_address)
    .bind(record.to_addr_bank_uuid)
    .bind(record.block_height)
    .bind(record.block_time)
    .bind(&record.amount)
    .bind(&record.denom)
    .bind(record.movement_type)
    .bind(Utc::now())
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Page through the ledger in block order, optionally bounded by block time
/// (`from` inclusive, `to` exclusive).
pub(crate) async fn list_coin_movements(
    pool: &SqlitePool,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    offset: i64,
    limit: i64,
) -> Result<Vec<CoinMovementView>, sqlx::Error> {
    sqlx::query_as::<_, CoinMovementView>(
        r#"
        SELECT
            c.tx_hash_v2, c.legacy_tx_hash, c.from_address, c.from_addr_bank_uuid,
            c.to_address, c.to_addr_bank_uuid, c.block_height, c.block_time,
            c.amount, c.denom, c.type,
            (SELECT COUNT(*) FROM coin_movement d WHERE d.legacy_tx_hash = c.legacy_tx_hash)
                AS movements_in_tx
        FROM coin_movement c
        WHERE (?1 IS NULL OR c.block_time >= ?1)
          AND (?2 IS NULL OR c.block_time < ?2)
        ORDER BY c.block_height, c.tx_hash_v2
        LIMIT ?3 OFFSET ?4
        "#,
    )
    .bind(from)
    .bind(to)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

const REGISTRATION_COLUMNS: &str = "uuid, address, bank_account_uuid, active, created";

/// Most recent registration of an address, active or not.
pub(crate) async fn find_latest_registration(
    pool: &SqlitePool,
    address: &str,
) -> Result<Option<AddressRegistration>, sqlx::Error> {
    sqlx::query_as::<_, AddressRegistration>(&format!(
        "SELECT {REGISTRATION_COLUMNS} FROM address_registration
         WHERE address = ?1 ORDER BY created DESC LIMIT 1"
    ))
    .bind(address)
    .fetch_optional(pool)
    .await
}

/// Most recent active registration of an address.
pub(crate) async fn find_active_registration(
    pool: &SqlitePool,
    address: &str,
) -> Result<Option<AddressRegistration>, sqlx::Error> {
    sqlx::query_as::<_, AddressRegistration>(&format!(
        "SELECT {REGISTRATION_COLUMNS} FROM address_registration
         WHERE address = ?1 AND active = 1 ORDER BY created DESC LIMIT 1"
    ))
    .bind(address)
    .fetch_optional(pool)
    .await
}

#[cfg(test)]
pub(crate) async fn insert_address_registration(
    pool: &SqlitePool,
    record: &AddressRegistration,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO address_registration (uuid, address, bank_account_uuid, active, created)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(record.uuid)
    .bind(&record.address)
    .bind(record.bank_account_uuid)
    .bind(record.active)
    .bind(record.created)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// Fresh in-memory database with the schema applied.
    ///
    /// A single connection keeps every query on the same in-memory database.
    pub(crate) async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    pub(crate) async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .expect("count")
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::{count_rows, test_pool};
    use super::*;
    use crate::indexer::types::{CoinMovementType, TxType};

    fn marker_transfer(tx_hash: &str) -> MarkerTransferRecord {
        let now = Utc::now();
        MarkerTransferRecord {
            uuid: DbUuid::new_v4(),
            from_address: "tp1from".to_string(),
            to_address: "tp1manager".to_string(),
            denom: "usdf.c".to_string(),
            amount: "1000".to_string(),
            height: DbBlockHeight::from(10),
            tx_hash: tx_hash.to_string(),
            status: MarkerTransferStatus::Inserted,
            created: now,
            updated: now,
        }
    }

    #[tokio::test]
    async fn test_event_stream_cursor() {
        let pool = test_pool().await;
        let uuid = DbUuid::new_v4();

        assert!(get_event_stream(&pool, &uuid).await.unwrap().is_none());

        let stream = insert_event_stream(&pool, &uuid, DbBlockHeight::from(100))
            .await
            .unwrap();
        assert_eq!(*stream.last_block_height, 100);

        // a second first-run keeps the existing cursor
        update_event_stream(&pool, &uuid, DbBlockHeight::from(150))
            .await
            .unwrap();
        let stream = insert_event_stream(&pool, &uuid, DbBlockHeight::from(100))
            .await
            .unwrap();
        assert_eq!(*stream.last_block_height, 150);
    }

    #[tokio::test]
    async fn test_marker_transfer_unique_per_hash() {
        let pool = test_pool().await;

        assert!(insert_marker_transfer(&pool, &marker_transfer("ABC")).await.unwrap());
        assert!(!insert_marker_transfer(&pool, &marker_transfer("ABC")).await.unwrap());
        assert_eq!(count_rows(&pool, "marker_transfer").await, 1);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_until_released() {
        let pool = test_pool().await;
        let record = marker_transfer("ABC");
        insert_marker_transfer(&pool, &record).await.unwrap();

        let claimed = claim_pending_marker_transfer(&pool, &record.uuid, 1_000, 61_000)
            .await
            .unwrap();
        assert!(claimed.is_some());

        // a second worker cannot claim it, nor does it show as pending
        assert!(claim_pending_marker_transfer(&pool, &record.uuid, 2_000, 62_000)
            .await
            .unwrap()
            .is_none());
        assert!(find_pending_marker_transfers(&pool, 2_000).await.unwrap().is_empty());

        release_marker_transfer_claim(&pool, &record.uuid).await.unwrap();
        assert_eq!(
            find_pending_marker_transfers(&pool, 2_000).await.unwrap(),
            vec![record.uuid]
        );
    }

    #[tokio::test]
    async fn test_expired_claim_can_be_taken_over() {
        let pool = test_pool().await;
        let record = marker_transfer("ABC");
        insert_marker_transfer(&pool, &record).await.unwrap();

        claim_pending_marker_transfer(&pool, &record.uuid, 1_000, 5_000)
            .await
            .unwrap();
        assert!(claim_pending_marker_transfer(&pool, &record.uuid, 6_000, 66_000)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_advance_marker_transfer_status_only_from_expected() {
        let pool = test_pool().await;
        let record = marker_transfer("ABC");
        insert_marker_transfer(&pool, &record).await.unwrap();

        assert!(advance_marker_transfer_status(
            &pool,
            &record.uuid,
            MarkerTransferStatus::Inserted,
            MarkerTransferStatus::ActionComplete,
        )
        .await
        .unwrap());
        assert!(!advance_marker_transfer_status(
            &pool,
            &record.uuid,
            MarkerTransferStatus::Inserted,
            MarkerTransferStatus::ActionComplete,
        )
        .await
        .unwrap());

        let stored = find_marker_transfer(&pool, &record.uuid).await.unwrap().unwrap();
        assert_eq!(stored.status, MarkerTransferStatus::ActionComplete);
    }

    #[tokio::test]
    async fn test_lock_and_set_tx_status() {
        let pool = test_pool().await;
        let now = Utc::now();
        let record = TxStatusRecord {
            uuid: DbUuid::new_v4(),
            tx_hash: "ABC".to_string(),
            tx_type: TxType::BurnContract,
            status: TxStatus::Pending,
            error_message: None,
            created: now,
            updated: now,
        };
        insert_tx_status(&pool, &record).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let locked = lock_tx_status_by_hash(&mut tx, "ABC").await.unwrap().unwrap();
        assert_eq!(locked.status, TxStatus::Pending);
        set_tx_status(&mut tx, &locked.uuid, TxStatus::Error, Some("out of gas"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let stored = find_tx_status_by_hash(&pool, "ABC").await.unwrap().unwrap();
        assert_eq!(stored.status, TxStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some("out of gas"));
    }

    #[tokio::test]
    async fn test_coin_movement_insert_ignores_duplicates() {
        let pool = test_pool().await;
        let record = CoinMovementRecord {
            tx_hash_v2: "ABC-0".to_string(),
            legacy_tx_hash: Some("ABC".to_string()),
            from_address: "tp1from".to_string(),
            from_addr_bank_uuid: None,
            to_address: "tp1to".to_string(),
            to_addr_bank_uuid: Some(DbUuid::new_v4()),
            block_height: DbBlockHeight::from(7),
            block_time: Utc::now(),
            amount: "500".to_string(),
            denom: "usdf.c".to_string(),
            movement_type: CoinMovementType::Mint,
        };

        let mut conn = pool.acquire().await.unwrap();
        assert!(insert_coin_movement(&mut conn, &record).await.unwrap());
        assert!(!insert_coin_movement(&mut conn, &record).await.unwrap());
        drop(conn);

        let views = list_coin_movements(&pool, None, None, 0, 10).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].movements_in_tx, 1);
        assert_eq!(views[0].record.to_addr_bank_uuid, record.to_addr_bank_uuid);
    }
}
