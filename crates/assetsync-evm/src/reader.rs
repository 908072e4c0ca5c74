//! The chain reader port and the range-splitting log fetcher.
//!
//! `ChainReader` is the narrow surface the engine consumes: current height,
//! logs by inclusive range, and block timestamps. `LogFetcher` layers two
//! behaviors on top:
//!
//! - preemptive chunking at `max_block_range`, plus recursive **bisection**
//!   when the node still rejects a range as too large. Bisection concatenates
//!   the halves in order, so ascending (block, log index) ordering is
//!   preserved across the split boundary.
//! - a per-cycle timestamp cache so each block's timestamp is fetched at most
//!   once per sync pass.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use assetsync_core::SyncError;

use crate::topics::EventKind;

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs` / `eth_subscribe("logs")`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(rename = "removed")]
    pub removed: Option<bool>,
}

impl RawLog {
    pub fn block_number_u64(&self) -> u64 {
        parse_hex_u64(&self.block_number)
    }

    pub fn log_index_u32(&self) -> u32 {
        parse_hex_u64(&self.log_index) as u32
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// Parse a hex-encoded string (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> u64 {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).unwrap_or(0)
}

// ─── ChainReader port ─────────────────────────────────────────────────────────

/// Read-only access to a blockchain node.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Latest known chain height. `NodeUnavailable` on transport error.
    async fn current_height(&self) -> Result<u64, SyncError>;

    /// Logs matching `kind` in the inclusive range `[from, to]`.
    /// `NodeUnavailable` on transport error, `RangeTooLarge` when the node
    /// caps the span.
    async fn get_logs(&self, kind: EventKind, from: u64, to: u64)
        -> Result<Vec<RawLog>, SyncError>;

    /// Unix timestamp of block `number`.
    async fn block_timestamp(&self, number: u64) -> Result<i64, SyncError>;
}

// ─── LogFetcher ───────────────────────────────────────────────────────────────

/// Wraps a `ChainReader` with range chunking and reactive bisection.
pub struct LogFetcher<C> {
    client: C,
    max_block_range: u64,
}

impl<C: ChainReader> LogFetcher<C> {
    pub fn new(client: C, max_block_range: u64) -> Self {
        Self {
            client,
            max_block_range: max_block_range.max(1),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub async fn current_height(&self) -> Result<u64, SyncError> {
        self.client.current_height().await
    }

    pub async fn block_timestamp(&self, number: u64) -> Result<i64, SyncError> {
        self.client.block_timestamp(number).await
    }

    /// Fetch all logs of `kind` in `[from, to]`, splitting as needed.
    pub async fn logs(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>, SyncError> {
        if to < from {
            return Ok(vec![]);
        }
        let mut all = Vec::new();
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(self.max_block_range - 1).min(to);
            all.extend(self.fetch_bisecting(kind, start, end).await?);
            start = end + 1;
        }
        Ok(all)
    }

    /// Fetch one chunk, bisecting recursively while the node rejects it.
    ///
    /// A single-block range that is still too large cannot be split further
    /// and propagates the error.
    fn fetch_bisecting(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> BoxFuture<'_, Result<Vec<RawLog>, SyncError>> {
        Box::pin(async move {
            match self.client.get_logs(kind, from, to).await {
                Ok(logs) => Ok(logs),
                Err(SyncError::RangeTooLarge { .. }) if from < to => {
                    let mid = from + (to - from) / 2;
                    tracing::debug!(kind = %kind, from, mid, to, "bisecting log range");
                    let mut left = self.fetch_bisecting(kind, from, mid).await?;
                    let right = self.fetch_bisecting(kind, mid + 1, to).await?;
                    left.extend(right);
                    Ok(left)
                }
                Err(e) => Err(e),
            }
        })
    }
}

// ─── Timestamp cache ──────────────────────────────────────────────────────────

/// Per-sync-pass block timestamp cache.
///
/// Scoped to one cycle: a fresh cache is created per pass so reorged blocks
/// never serve stale timestamps across cycles.
#[derive(Default)]
pub struct TimestampCache {
    by_block: HashMap<u64, i64>,
}

impl TimestampCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get<C: ChainReader>(
        &mut self,
        client: &C,
        block_number: u64,
    ) -> Result<i64, SyncError> {
        if let Some(ts) = self.by_block.get(&block_number) {
            return Ok(*ts);
        }
        let ts = client.block_timestamp(block_number).await?;
        self.by_block.insert(block_number, ts);
        Ok(ts)
    }

    pub fn len(&self) -> usize {
        self.by_block.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_block.is_empty()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn log_at(block: u64, index: u32) -> RawLog {
        RawLog {
            address: "0xc0ffee".into(),
            topics: vec![EventKind::Registration.topic0()],
            data: "0x".into(),
            block_number: format!("0x{block:x}"),
            tx_hash: format!("0x{block:064x}"),
            log_index: format!("0x{index:x}"),
            removed: None,
        }
    }

    /// Rejects any range wider than `limit` blocks, otherwise returns one
    /// log per block in ascending order.
    struct CappedReader {
        limit: u64,
        calls: AtomicU32,
        timestamp_calls: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl ChainReader for CappedReader {
        async fn current_height(&self) -> Result<u64, SyncError> {
            Ok(1_000)
        }

        async fn get_logs(
            &self,
            _kind: EventKind,
            from: u64,
            to: u64,
        ) -> Result<Vec<RawLog>, SyncError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if to - from + 1 > self.limit {
                return Err(SyncError::RangeTooLarge { from, to });
            }
            Ok((from..=to).map(|b| log_at(b, 0)).collect())
        }

        async fn block_timestamp(&self, number: u64) -> Result<i64, SyncError> {
            self.timestamp_calls.lock().unwrap().push(number);
            Ok(number as i64 * 12)
        }
    }

    fn capped(limit: u64) -> CappedReader {
        CappedReader {
            limit,
            calls: AtomicU32::new(0),
            timestamp_calls: Mutex::new(vec![]),
        }
    }

    #[test]
    fn parse_hex_u64_basic() {
        assert_eq!(parse_hex_u64("0x1"), 1);
        assert_eq!(parse_hex_u64("0xff"), 255);
        assert_eq!(parse_hex_u64("1234"), 0x1234);
    }

    #[tokio::test]
    async fn bisection_preserves_order() {
        // Node accepts at most 3 blocks per call; request 100..=115.
        let fetcher = LogFetcher::new(capped(3), 10_000);
        let logs = fetcher.logs(EventKind::Registration, 100, 115).await.unwrap();

        let blocks: Vec<u64> = logs.iter().map(|l| l.block_number_u64()).collect();
        let expected: Vec<u64> = (100..=115).collect();
        assert_eq!(blocks, expected);
    }

    #[tokio::test]
    async fn single_block_rejection_propagates() {
        // Even one block is too large; bisection cannot help.
        let fetcher = LogFetcher::new(capped(0), 10_000);
        let err = fetcher.logs(EventKind::Transfer, 5, 5).await.unwrap_err();
        assert!(matches!(err, SyncError::RangeTooLarge { from: 5, to: 5 }));
    }

    #[tokio::test]
    async fn preemptive_chunking_respects_max_range() {
        let reader = capped(u64::MAX);
        let fetcher = LogFetcher::new(reader, 4);
        let logs = fetcher.logs(EventKind::Registration, 1, 10).await.unwrap();
        assert_eq!(logs.len(), 10);
        // 10 blocks at 4 per chunk → 3 calls, none bisected.
        assert_eq!(fetcher.client().calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn empty_range_is_noop() {
        let fetcher = LogFetcher::new(capped(10), 10_000);
        let logs = fetcher.logs(EventKind::Registration, 10, 9).await.unwrap();
        assert!(logs.is_empty());
        assert_eq!(fetcher.client().calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn timestamp_cache_deduplicates_lookups() {
        let reader = capped(10);
        let mut cache = TimestampCache::new();

        assert_eq!(cache.get(&reader, 100).await.unwrap(), 1_200);
        assert_eq!(cache.get(&reader, 100).await.unwrap(), 1_200);
        assert_eq!(cache.get(&reader, 101).await.unwrap(), 1_212);

        // Block 100 was only fetched once.
        assert_eq!(*reader.timestamp_calls.lock().unwrap(), vec![100, 101]);
        assert_eq!(cache.len(), 2);
    }
}
