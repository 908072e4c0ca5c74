//! The ledger port: idempotent writes and read queries over stored records.
//!
//! Backends live in `assetsync-storage` (memory, SQLite, Postgres). Writes
//! must be atomic per record: the store's native conflict resolution is what
//! serializes a backfill upsert racing a live-path upsert for the same key,
//! not application-level locking.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::{AssetRow, LedgerStats, OwnerActivity, Registration, Transfer};

/// Persistence port consumed by the sync engine and the query API.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Upsert a registration keyed by `asset_id` (last-write-wins).
    ///
    /// Safe to repeat: a registration's fields are immutable on-chain, so
    /// re-applying the same values is a no-op in effect.
    async fn upsert_registration(&self, reg: &Registration) -> Result<i64, SyncError>;

    /// Upsert a transfer keyed by `(tx_hash, log_index)`.
    ///
    /// Duplicate delivery (a backfill re-scan overlapping the live path)
    /// leaves exactly one row.
    async fn upsert_transfer(&self, xfer: &Transfer) -> Result<i64, SyncError>;

    /// The durably stored watermark, or `None` if the ledger has never been
    /// synced.
    async fn watermark(&self) -> Result<Option<u64>, SyncError>;

    /// Advance the stored watermark. Monotonic: a value at or below the
    /// current watermark is a no-op.
    async fn advance_watermark(&self, block: u64) -> Result<(), SyncError>;

    /// All registered assets with their computed current owner, ordered by
    /// asset id.
    async fn all_assets(&self) -> Result<Vec<AssetRow>, SyncError>;

    /// Assets whose *current* owner matches `owner` (input is lowercased
    /// before comparison).
    async fn assets_by_owner(&self, owner: &str) -> Result<Vec<AssetRow>, SyncError>;

    /// Transfer history for one asset, newest first.
    async fn transfers_for_asset(&self, asset_id: u64) -> Result<Vec<Transfer>, SyncError>;

    /// Aggregate totals.
    async fn stats(&self) -> Result<LedgerStats, SyncError>;

    /// Owners ranked by transfers initiated, descending.
    async fn top_active_owners(&self, limit: u32) -> Result<Vec<OwnerActivity>, SyncError>;

    /// Store connectivity check for health reporting.
    async fn ping(&self) -> Result<(), SyncError>;
}
