//! In-memory ledger backend.
//!
//! Holds records in maps keyed the same way the SQL backends key their
//! uniqueness constraints, so idempotency behaves identically across
//! backends. All data is lost when the process exits.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use assetsync_core::{
    normalize_address, AssetRow, Ledger, LedgerStats, OwnerActivity, Registration, SyncError,
    Transfer,
};

/// In-memory ledger for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryLedger {
    registrations: Mutex<BTreeMap<u64, Registration>>,
    /// Keyed by `(tx_hash, log_index)`, the transfer uniqueness key.
    transfers: Mutex<BTreeMap<(String, u32), Transfer>>,
    watermark: Mutex<Option<u64>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest transfer for an asset, by event timestamp then block order.
    fn current_owner_of(&self, reg: &Registration) -> String {
        self.transfers
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.asset_id == reg.asset_id)
            .max_by_key(|t| (t.event_timestamp, t.block_number, t.log_index))
            .map(|t| t.new_owner.clone())
            .unwrap_or_else(|| reg.owner.clone())
    }

    fn asset_row(&self, reg: &Registration) -> AssetRow {
        AssetRow {
            asset_id: reg.asset_id,
            owner: reg.owner.clone(),
            current_owner: self.current_owner_of(reg),
            description: reg.description.clone(),
            event_timestamp: reg.event_timestamp,
            block_number: reg.block_number,
            tx_hash: reg.tx_hash.clone(),
        }
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn upsert_registration(&self, reg: &Registration) -> Result<i64, SyncError> {
        self.registrations
            .lock()
            .unwrap()
            .insert(reg.asset_id, reg.clone());
        Ok(reg.asset_id as i64)
    }

    async fn upsert_transfer(&self, xfer: &Transfer) -> Result<i64, SyncError> {
        let key = (xfer.tx_hash.clone(), xfer.log_index);
        let mut transfers = self.transfers.lock().unwrap();
        transfers.insert(key, xfer.clone());
        Ok(transfers.len() as i64)
    }

    async fn watermark(&self) -> Result<Option<u64>, SyncError> {
        Ok(*self.watermark.lock().unwrap())
    }

    async fn advance_watermark(&self, block: u64) -> Result<(), SyncError> {
        let mut wm = self.watermark.lock().unwrap();
        if wm.map_or(true, |current| block > current) {
            *wm = Some(block);
        }
        Ok(())
    }

    async fn all_assets(&self) -> Result<Vec<AssetRow>, SyncError> {
        let regs = self.registrations.lock().unwrap().clone();
        Ok(regs.values().map(|r| self.asset_row(r)).collect())
    }

    async fn assets_by_owner(&self, owner: &str) -> Result<Vec<AssetRow>, SyncError> {
        let owner = normalize_address(owner);
        let regs = self.registrations.lock().unwrap().clone();
        Ok(regs
            .values()
            .map(|r| self.asset_row(r))
            .filter(|row| row.current_owner == owner)
            .collect())
    }

    async fn transfers_for_asset(&self, asset_id: u64) -> Result<Vec<Transfer>, SyncError> {
        let mut out: Vec<Transfer> = self
            .transfers
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.asset_id == asset_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (b.event_timestamp, b.block_number, b.log_index)
                .cmp(&(a.event_timestamp, a.block_number, a.log_index))
        });
        Ok(out)
    }

    async fn stats(&self) -> Result<LedgerStats, SyncError> {
        Ok(LedgerStats {
            total_assets: self.registrations.lock().unwrap().len() as u64,
            total_transfers: self.transfers.lock().unwrap().len() as u64,
        })
    }

    async fn top_active_owners(&self, limit: u32) -> Result<Vec<OwnerActivity>, SyncError> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for t in self.transfers.lock().unwrap().values() {
            *counts.entry(t.previous_owner.clone()).or_default() += 1;
        }
        let mut ranked: Vec<OwnerActivity> = counts
            .into_iter()
            .map(|(owner, transfer_count)| OwnerActivity { owner, transfer_count })
            .collect();
        ranked.sort_by(|a, b| b.transfer_count.cmp(&a.transfer_count));
        ranked.truncate(limit as usize);
        Ok(ranked)
    }

    async fn ping(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(asset_id: u64, owner: &str) -> Registration {
        Registration {
            asset_id,
            owner: owner.into(),
            description: "deed".into(),
            event_timestamp: 1_700_000_000,
            block_number: 103,
            tx_hash: format!("0x{asset_id:x}"),
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
    async fn registration_upsert_overwrites() {
        let ledger = MemoryLedger::new();
        ledger.upsert_registration(&reg(7, "0xaa")).await.unwrap();
        ledger.upsert_registration(&reg(7, "0xaa")).await.unwrap();

        assert_eq!(ledger.stats().await.unwrap().total_assets, 1);
    }

    #[tokio::test]
    async fn transfer_upsert_keyed_by_tx_and_index() {
        let ledger = MemoryLedger::new();
        let t = xfer(7, "0xaa", "0xbb", 1_700_000_100, "0x1");
        ledger.upsert_transfer(&t).await.unwrap();
        ledger.upsert_transfer(&t).await.unwrap();
        assert_eq!(ledger.stats().await.unwrap().total_transfers, 1);

        // A different log index in the same tx is a distinct transfer.
        let mut t2 = t.clone();
        t2.log_index = 1;
        ledger.upsert_transfer(&t2).await.unwrap();
        assert_eq!(ledger.stats().await.unwrap().total_transfers, 2);
    }

    #[tokio::test]
    async fn watermark_never_decreases() {
        let ledger = MemoryLedger::new();
        assert_eq!(ledger.watermark().await.unwrap(), None);

        ledger.advance_watermark(105).await.unwrap();
        ledger.advance_watermark(100).await.unwrap();
        assert_eq!(ledger.watermark().await.unwrap(), Some(105));
    }

    #[tokio::test]
    async fn current_owner_follows_latest_transfer() {
        let ledger = MemoryLedger::new();
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
        assert_eq!(assets[0].current_owner, "0xcc");

        // Owner queries lowercase their input.
        assert_eq!(ledger.assets_by_owner("0xCC").await.unwrap().len(), 1);
        assert!(ledger.assets_by_owner("0xbb").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transfers_for_asset_newest_first() {
        let ledger = MemoryLedger::new();
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
        ledger
            .upsert_transfer(&xfer(8, "0xee", "0xff", 400, "0x4"))
            .await
            .unwrap();

        let history = ledger.transfers_for_asset(7).await.unwrap();
        let ts: Vec<i64> = history.iter().map(|t| t.event_timestamp).collect();
        assert_eq!(ts, vec![300, 200, 100]);
    }

    #[tokio::test]
    async fn top_owners_ranked_by_transfers_initiated() {
        let ledger = MemoryLedger::new();
        for (i, prev) in ["0xaa", "0xaa", "0xaa", "0xbb", "0xbb", "0xcc"].iter().enumerate() {
            ledger
                .upsert_transfer(&xfer(1, prev, "0xdd", i as i64, &format!("0x{i}")))
                .await
                .unwrap();
        }

        let ranked = ledger.top_active_owners(2).await.unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].owner, "0xaa");
        assert_eq!(ranked[0].transfer_count, 3);
        assert_eq!(ranked[1].owner, "0xbb");
    }
}
