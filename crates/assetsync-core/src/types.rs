//! Canonical record types produced by normalization and stored in the ledger.

use serde::{Deserialize, Serialize};

// ─── Registration ─────────────────────────────────────────────────────────────

/// A canonical asset-registration record.
///
/// At most one row per `asset_id` is ever stored; redundant delivery of the
/// same registration overwrites rather than duplicates. A registration's
/// on-chain fields are immutable, so last-write-wins is a no-op in effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub asset_id: u64,
    /// Owner address, lowercased `0x…`.
    pub owner: String,
    pub description: String,
    /// Timestamp carried in the event payload (seconds since epoch).
    pub event_timestamp: i64,
    pub block_number: u64,
    pub tx_hash: String,
    /// Log index within the block; together with `tx_hash` this pins the
    /// record to a single on-chain emission.
    pub log_index: u32,
    /// Timestamp of the containing block (seconds since epoch).
    pub block_timestamp: i64,
}

// ─── Transfer ─────────────────────────────────────────────────────────────────

/// A canonical ownership-transfer record.
///
/// `asset_id` references a registration but is not a hard foreign key, so
/// out-of-order arrival is tolerated. A transfer is uniquely identified by
/// `(tx_hash, log_index)` and the ledger upserts on that key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub asset_id: u64,
    /// Previous owner address, lowercased `0x…`.
    pub previous_owner: String,
    /// New owner address, lowercased `0x…`.
    pub new_owner: String,
    pub event_timestamp: i64,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub block_timestamp: i64,
}

// ─── AssetEvent ───────────────────────────────────────────────────────────────

/// A normalized event, the unit both the backfill and live paths deliver to
/// the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetEvent {
    Registered(Registration),
    Transferred(Transfer),
}

impl AssetEvent {
    pub fn asset_id(&self) -> u64 {
        match self {
            Self::Registered(r) => r.asset_id,
            Self::Transferred(t) => t.asset_id,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            Self::Registered(r) => r.block_number,
            Self::Transferred(t) => t.block_number,
        }
    }

    pub fn tx_hash(&self) -> &str {
        match self {
            Self::Registered(r) => &r.tx_hash,
            Self::Transferred(t) => &t.tx_hash,
        }
    }
}

// ─── Query views ──────────────────────────────────────────────────────────────

/// A registered asset joined with its computed current owner (the newest
/// transfer's `new_owner`, falling back to the registering owner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRow {
    pub asset_id: u64,
    pub owner: String,
    pub current_owner: String,
    pub description: String,
    pub event_timestamp: i64,
    pub block_number: u64,
    pub tx_hash: String,
}

/// Aggregate counters over the stored records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_assets: u64,
    pub total_transfers: u64,
}

/// An owner ranked by how many transfers it initiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerActivity {
    pub owner: String,
    pub transfer_count: u64,
}

/// Lowercase an address for storage or comparison.
///
/// All owner fields are stored lowercased; query inputs must pass through the
/// same normalization so equality comparisons match.
pub fn normalize_address(addr: &str) -> String {
    addr.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_normalization_lowercases() {
        assert_eq!(
            normalize_address("0xAbCdEf0123456789aBcDeF0123456789abCDef01"),
            "0xabcdef0123456789abcdef0123456789abcdef01"
        );
    }

    #[test]
    fn asset_event_accessors() {
        let ev = AssetEvent::Registered(Registration {
            asset_id: 7,
            owner: "0xaa".into(),
            description: "deed".into(),
            event_timestamp: 1_700_000_000,
            block_number: 103,
            tx_hash: "0xbeef".into(),
            log_index: 2,
            block_timestamp: 1_700_000_012,
        });
        assert_eq!(ev.asset_id(), 7);
        assert_eq!(ev.block_number(), 103);
        assert_eq!(ev.tx_hash(), "0xbeef");
    }
}
