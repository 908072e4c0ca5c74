//! SQLite ledger backend.
//!
//! Persists registrations, transfers, and the sync watermark to a single
//! SQLite file. Uses `sqlx` with WAL mode for concurrent read performance.
//! Idempotency lives in the schema: registrations are unique per `asset_id`,
//! transfers per `(tx_hash, log_index)`, and both writes are
//! `ON CONFLICT … DO UPDATE` upserts, so the store's native conflict
//! resolution serializes racing writers per key.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use assetsync_core::{
    normalize_address, AssetRow, Ledger, LedgerStats, OwnerActivity, Registration, SyncError,
    Transfer,
};

/// SQLite-backed ledger.
pub struct SqliteLedger {
    pool: SqlitePool,
}

fn store_err(e: sqlx::Error) -> SyncError {
    SyncError::Store(e.to_string())
}

impl SqliteLedger {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./assets.db"`) or a full SQLite
    /// URL (`"sqlite:./assets.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, SyncError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(store_err)?;
        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    /// Open an in-memory SQLite database (single connection so every query
    /// sees the same data). All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(store_err)?;

        let ledger = Self { pool };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS asset_registrations (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                asset_id        INTEGER NOT NULL UNIQUE,
                owner           TEXT    NOT NULL,
                description     TEXT    NOT NULL,
                event_timestamp INTEGER NOT NULL,
                block_number    INTEGER NOT NULL,
                tx_hash         TEXT    NOT NULL,
                log_index       INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ownership_transfers (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                asset_id        INTEGER NOT NULL,
                previous_owner  TEXT    NOT NULL,
                new_owner       TEXT    NOT NULL,
                event_timestamp INTEGER NOT NULL,
                block_number    INTEGER NOT NULL,
                tx_hash         TEXT    NOT NULL,
                log_index       INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL,
                UNIQUE (tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_watermark (
                id           INTEGER PRIMARY KEY CHECK (id = 0),
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        for stmt in [
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

/// Shared row mapping for the asset queries.
fn asset_row(row: &sqlx::sqlite::SqliteRow) -> AssetRow {
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

/// Registrations joined with the newest transfer's `new_owner`.
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
impl Ledger for SqliteLedger {
    async fn upsert_registration(&self, reg: &Registration) -> Result<i64, SyncError> {
        let row = sqlx::query(
            "INSERT INTO asset_registrations
                 (asset_id, owner, description, event_timestamp,
                  block_number, tx_hash, log_index, block_timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
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
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
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
             VALUES (0, ?, ?)
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
            "SELECT * FROM ({ASSETS_WITH_CURRENT_OWNER})
             WHERE current_owner = ? ORDER BY asset_id"
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
             WHERE asset_id = ?
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
             LIMIT ?",
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

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(asset_id: u64, owner: &str) -> Registration {
        Registration {
            asset_id,
            owner: owner.into(),
            description: "warehouse deed".into(),
            event_timestamp: 1_700_000_000,
            block_number: 103,
            tx_hash: format!("0x{asset_id:064x}"),
            log_index: 0,
            block_timestamp: 1_700_000_012,
        }
    }

    fn xfer(asset_id: u64, prev: &str, new: &str, ts: i64, tx: &str) -> Transfer {
        Transfer {
            asset_id,
            previous_owner: prev.into(),
            new_owner: new.into(),
            event_timestamp: ts,
            block_number: 104,
            tx_hash: tx.into(),
            log_index: 0,
            block_timestamp: ts + 12,
        }
    }

    #[tokio::test]
    async fn registration_upsert_is_idempotent() {
        let ledger = SqliteLedger::in_memory().await.unwrap();

        let first = ledger.upsert_registration(&reg(7, "0xaa")).await.unwrap();
        let second = ledger.upsert_registration(&reg(7, "0xaa")).await.unwrap();

        // Same row both times: no duplicate, stable id.
        assert_eq!(first, second);
        assert_eq!(ledger.stats().await.unwrap().total_assets, 1);

        let assets = ledger.all_assets().await.unwrap();
        assert_eq!(assets[0].description, "warehouse deed");
    }

    #[tokio::test]
    async fn large_asset_id_survives_exactly() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger
            .upsert_registration(&reg(123_456_789_012_345, "0xaa"))
            .await
            .unwrap();

        let assets = ledger.all_assets().await.unwrap();
        assert_eq!(assets[0].asset_id, 123_456_789_012_345);
    }

    #[tokio::test]
    async fn transfer_upsert_collapses_duplicates() {
        let ledger = SqliteLedger::in_memory().await.unwrap();

        let t = xfer(7, "0xaa", "0xbb", 1_700_000_100, "0xcafe");
        let first = ledger.upsert_transfer(&t).await.unwrap();
        let second = ledger.upsert_transfer(&t).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.stats().await.unwrap().total_transfers, 1);

        // Distinct log index means a distinct transfer.
        let mut t2 = t.clone();
        t2.log_index = 1;
        ledger.upsert_transfer(&t2).await.unwrap();
        assert_eq!(ledger.stats().await.unwrap().total_transfers, 2);
    }

    #[tokio::test]
    async fn watermark_roundtrip_and_monotonicity() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        assert_eq!(ledger.watermark().await.unwrap(), None);

        ledger.advance_watermark(105).await.unwrap();
        assert_eq!(ledger.watermark().await.unwrap(), Some(105));

        // A stale advance is a no-op.
        ledger.advance_watermark(100).await.unwrap();
        assert_eq!(ledger.watermark().await.unwrap(), Some(105));

        ledger.advance_watermark(110).await.unwrap();
        assert_eq!(ledger.watermark().await.unwrap(), Some(110));
    }

    #[tokio::test]
    async fn current_owner_tracks_latest_transfer() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.upsert_registration(&reg(7, "0xaa")).await.unwrap();

        ledger
            .upsert_transfer(&xfer(7, "0xaa", "0xbb", 1_700_000_100, "0x1"))
            .await
            .unwrap();
        ledger
            .upsert_transfer(&xfer(7, "0xbb", "0xcc", 1_700_000_200, "0x2"))
            .await
            .unwrap();

        let assets = ledger.all_assets().await.unwrap();
        assert_eq!(assets[0].owner, "0xaa");
        assert_eq!(assets[0].current_owner, "0xcc");

        // Mixed-case query input still matches.
        let owned = ledger.assets_by_owner("0xCC").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert!(ledger.assets_by_owner("0xaa").await.unwrap().is_empty());
        assert!(ledger.assets_by_owner("0xbb").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregistered_transfer_is_tolerated() {
        // Out-of-order arrival: transfer lands before its registration.
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger
            .upsert_transfer(&xfer(99, "0xaa", "0xbb", 1_700_000_100, "0x1"))
            .await
            .unwrap();

        assert_eq!(ledger.stats().await.unwrap().total_transfers, 1);
        // Asset view only lists registered assets.
        assert!(ledger.all_assets().await.unwrap().is_empty());

        // The registration arriving later completes the picture.
        ledger.upsert_registration(&reg(99, "0xaa")).await.unwrap();
        let assets = ledger.all_assets().await.unwrap();
        assert_eq!(assets[0].current_owner, "0xbb");
    }

    #[tokio::test]
    async fn transfer_history_ordering() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger
            .upsert_transfer(&xfer(7, "0xaa", "0xbb", 100, "0x1"))
            .await
            .unwrap();
        ledger
            .upsert_transfer(&xfer(7, "0xbb", "0xcc", 300, "0x2"))
            .await
            .unwrap();
        ledger
            .upsert_transfer(&xfer(7, "0xcc", "0xdd", 200, "0x3"))
            .await
            .unwrap();

        let history = ledger.transfers_for_asset(7).await.unwrap();
        let ts: Vec<i64> = history.iter().map(|t| t.event_timestamp).collect();
        assert_eq!(ts, vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn top_active_owners_ranked() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        for (i, prev) in ["0xaa", "0xaa", "0xbb"].iter().enumerate() {
            ledger
                .upsert_transfer(&xfer(1, prev, "0xee", i as i64, &format!("0x{i}")))
                .await
                .unwrap();
        }

        let ranked = ledger.top_active_owners(5).await.unwrap();
        assert_eq!(ranked[0].owner, "0xaa");
        assert_eq!(ranked[0].transfer_count, 2);
        assert_eq!(ranked[1].owner, "0xbb");
        assert_eq!(ranked[1].transfer_count, 1);
    }

    #[tokio::test]
    async fn ping_succeeds_on_open_pool() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.ping().await.unwrap();
    }
}
