//! PostgreSQL ledger backend.
//!
//! Same schema and upsert discipline as the SQLite backend, expressed in
//! Postgres SQL (`BIGSERIAL`, `$n` binds). Intended for deployments where
//! the indexed data is served to more than one reader.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;

use assetsync_core::{
    normalize_address, AssetRow, Ledger, LedgerStats, OwnerActivity, Registration, SyncError,
    Transfer,
};

/// PostgreSQL-backed ledger.
pub struct PostgresLedger {
    pool: PgPool,
}

fn store_err(e: sqlx::Error) -> SyncError {
    SyncError::Store(e.to_string())
}

impl PostgresLedger {
    /// Connect to the database at `url` (e.g. `postgres://user@host/assets`)
    /// and create the schema if it does not exist.
    pub async fn connect(url: &str) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(store_err)?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        for stmt in [
            "CREATE TABLE IF NOT EXISTS asset_registrations (
                id              BIGSERIAL PRIMARY KEY,
                asset_id        BIGINT NOT NULL UNIQUE,
                owner           TEXT   NOT NULL,
                description     TEXT   NOT NULL,
                event_timestamp BIGINT NOT NULL,
                block_number    BIGINT NOT NULL,
                tx_hash         TEXT   NOT NULL,
                log_index       BIGINT NOT NULL,
                block_timestamp BIGINT NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS ownership_transfers (
                id              BIGSERIAL PRIMARY KEY,
                asset_id        BIGINT NOT NULL,
                previous_owner  TEXT   NOT NULL,
                new_owner       TEXT   NOT NULL,
                event_timestamp BIGINT NOT NULL,
                block_number    BIGINT NOT NULL,
                tx_hash         TEXT   NOT NULL,
                log_index       BIGINT NOT NULL,
                block_timestamp BIGINT NOT NULL,
                UNIQUE (tx_hash, log_index)
            );",
            "CREATE TABLE IF NOT EXISTS sync_watermark (
                id           INTEGER PRIMARY KEY CHECK (id = 0),
                block_number BIGINT NOT NULL,
                updated_at   BIGINT NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_registrations_owner ON asset_registrations (owner);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_asset ON ownership_transfers (asset_id);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_new_owner ON ownership_transfers (new_owner);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_prev_owner ON ownership_transfers (previous_owner);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_timestamp ON ownership_transfers (event_timestamp);",
        ] {
            sqlx::query(stmt).execute(&self.pool).await.map_err(store_err)?;
        }
        Ok(())
    }
}

fn asset_row(row: &sqlx::postgres::PgRow) -> AssetRow {
    AssetRow {
        asset_id: row.get::<i64, _>("asset_id") as u64,
        owner: row.get("owner"),
        current_owner: row.get("current_owner"),
        description: row.get("description"),
        event_timestamp: row.get("event_timestamp"),
        block_number: row.get::<i64, _>("block_number") as u64,
        tx_hash: row.get("tx_hash"),
    }
}

const ASSETS_WITH_CURRENT_OWNER: &str = "
    SELECT r.asset_id, r.owner, r.description, r.event_timestamp,
           r.block_number, r.tx_hash,
           COALESCE(
               (SELECT t.new_owner FROM ownership_transfers t
                WHERE t.asset_id = r.asset_id
                ORDER BY t.event_timestamp DESC, t.block_number DESC, t.log_index DESC
                LIMIT 1),
               r.owner
           ) AS current_owner
    FROM asset_registrations r";

#[async_trait]
impl Ledger for PostgresLedger {
    async fn upsert_registration(&self, reg: &Registration) -> Result<i64, SyncError> {
        let row = sqlx::query(
            "INSERT INTO asset_registrations
                 (asset_id, owner, description, event_timestamp,
                  block_number, tx_hash, log_index, block_timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (asset_id) DO UPDATE SET
                 owner           = excluded.owner,
                 description     = excluded.description,
                 event_timestamp = excluded.event_timestamp,
                 block_number    = excluded.block_number,
                 tx_hash         = excluded.tx_hash,
                 log_index       = excluded.log_index,
                 block_timestamp = excluded.block_timestamp
             RETURNING id",
        )
        .bind(reg.asset_id as i64)
        .bind(&reg.owner)
        .bind(&reg.description)
        .bind(reg.event_timestamp)
        .bind(reg.block_number as i64)
        .bind(&reg.tx_hash)
        .bind(reg.log_index as i64)
        .bind(reg.block_timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        debug!(asset_id = reg.asset_id, block = reg.block_number, "registration stored");
        Ok(row.get("id"))
    }

    async fn upsert_transfer(&self, xfer: &Transfer) -> Result<i64, SyncError> {
        let row = sqlx::query(
            "INSERT INTO ownership_transfers
                 (asset_id, previous_owner, new_owner, event_timestamp,
                  block_number, tx_hash, log_index, block_timestamp)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (tx_hash, log_index) DO UPDATE SET
                 asset_id        = excluded.asset_id,
                 previous_owner  = excluded.previous_owner,
                 new_owner       = excluded.new_owner,
                 event_timestamp = excluded.event_timestamp,
                 block_number    = excluded.block_number,
                 block_timestamp = excluded.block_timestamp
             RETURNING id",
        )
        .bind(xfer.asset_id as i64)
        .bind(&xfer.previous_owner)
        .bind(&xfer.new_owner)
        .bind(xfer.event_timestamp)
        .bind(xfer.block_number as i64)
        .bind(&xfer.tx_hash)
        .bind(xfer.log_index as i64)
        .bind(xfer.block_timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        debug!(asset_id = xfer.asset_id, block = xfer.block_number, "transfer stored");
        Ok(row.get("id"))
    }

    async fn watermark(&self) -> Result<Option<u64>, SyncError> {
        let row = sqlx::query("SELECT block_number FROM sync_watermark WHERE id = 0")
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(|r| r.get::<i64, _>("block_number") as u64))
    }

    async fn advance_watermark(&self, block: u64) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO sync_watermark (id, block_number, updated_at)
             VALUES (0, $1, $2)
             ON CONFLICT (id) DO UPDATE SET
                 block_number = excluded.block_number,
                 updated_at   = excluded.updated_at
             WHERE excluded.block_number > sync_watermark.block_number",
        )
        .bind(block as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn all_assets(&self) -> Result<Vec<AssetRow>, SyncError> {
        let sql = format!("{ASSETS_WITH_CURRENT_OWNER} ORDER BY r.asset_id");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.iter().map(asset_row).collect())
    }

    async fn assets_by_owner(&self, owner: &str) -> Result<Vec<AssetRow>, SyncError> {
        let sql = format!(
            "SELECT * FROM ({ASSETS_WITH_CURRENT_OWNER}) AS assets
             WHERE current_owner = $1 ORDER BY asset_id"
        );
        let rows = sqlx::query(&sql)
            .bind(normalize_address(owner))
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.iter().map(asset_row).collect())
    }

    async fn transfers_for_asset(&self, asset_id: u64) -> Result<Vec<Transfer>, SyncError> {
        let rows = sqlx::query(
            "SELECT asset_id, previous_owner, new_owner, event_timestamp,
                    block_number, tx_hash, log_index, block_timestamp
             FROM ownership_transfers
             WHERE asset_id = $1
             ORDER BY event_timestamp DESC, block_number DESC, log_index DESC",
        )
        .bind(asset_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .iter()
            .map(|row| Transfer {
                asset_id: row.get::<i64, _>("asset_id") as u64,
                previous_owner: row.get("previous_owner"),
                new_owner: row.get("new_owner"),
                event_timestamp: row.get("event_timestamp"),
                block_number: row.get::<i64, _>("block_number") as u64,
                tx_hash: row.get("tx_hash"),
                log_index: row.get::<i64, _>("log_index") as u32,
                block_timestamp: row.get("block_timestamp"),
            })
            .collect())
    }

    async fn stats(&self) -> Result<LedgerStats, SyncError> {
        let row = sqlx::query(
            "SELECT
                 (SELECT COUNT(*) FROM asset_registrations) AS total_assets,
                 (SELECT COUNT(*) FROM ownership_transfers) AS total_transfers",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(LedgerStats {
            total_assets: row.get::<i64, _>("total_assets") as u64,
            total_transfers: row.get::<i64, _>("total_transfers") as u64,
        })
    }

    async fn top_active_owners(&self, limit: u32) -> Result<Vec<OwnerActivity>, SyncError> {
        let rows = sqlx::query(
            "SELECT previous_owner AS owner, COUNT(*) AS transfer_count
             FROM ownership_transfers
             GROUP BY previous_owner
             ORDER BY transfer_count DESC
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .iter()
            .map(|row| OwnerActivity {
                owner: row.get("owner"),
                transfer_count: row.get::<i64, _>("transfer_count") as u64,
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), SyncError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
