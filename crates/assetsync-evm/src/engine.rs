//! The sync engine orchestrates range selection, retrieval, normalization,
//! and idempotent persistence.
//!
//! # Backfill cycle
//! On each tick (and on demand via [`SyncEngine::sync_now`]):
//! read head → scan `[watermark+1, head]` → normalize → persist through the
//! sink → advance the watermark. The watermark moves only after every write
//! in the range is acknowledged, so a partial failure leaves it untouched and
//! the whole range is retried next tick. Upsert semantics make that retry
//! safe.
//!
//! # Live path
//! Pushed logs go through the same normalize/persist path, never touching
//! the watermark. Subscriptions can drop silently; the backfill cycle is the
//! authoritative, self-healing source of truth.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use assetsync_core::{
    AssetEvent, EventSink, Ledger, LedgerSink, SyncConfig, SyncError, SyncState, Watermark,
};

use crate::normalize::normalize;
use crate::reader::{ChainReader, LogFetcher, RawLog, TimestampCache};
use crate::subscription::LogStream;
use crate::topics::EventKind;

// ─── Outcome & health types ───────────────────────────────────────────────────

/// Result of one backfill cycle, exposed to the API layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleOutcome {
    pub from_block: u64,
    pub to_block: u64,
    pub registrations: u64,
    pub transfers: u64,
    /// Per-record failures (malformed or overflowing logs) skipped with a
    /// warning.
    pub skipped: u64,
}

impl CycleOutcome {
    fn noop(watermark: u64) -> Self {
        Self {
            from_block: watermark + 1,
            to_block: watermark,
            ..Default::default()
        }
    }

    /// Returns `true` if the cycle found no new blocks to scan.
    pub fn is_noop(&self) -> bool {
        self.to_block < self.from_block
    }
}

/// Snapshot of engine and dependency health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub chain_height: Option<u64>,
    pub store_connected: bool,
    pub watermark: Option<u64>,
    pub state: SyncState,
}

#[derive(Default)]
struct FailureLog {
    last: Option<String>,
    repeats: u32,
}

// ─── SyncEngine ───────────────────────────────────────────────────────────────

/// The event synchronization engine.
pub struct SyncEngine<C: ChainReader> {
    config: SyncConfig,
    fetcher: LogFetcher<C>,
    ledger: Arc<dyn Ledger>,
    sink: Arc<dyn EventSink>,
    watermark: Mutex<Option<Watermark>>,
    state: Mutex<SyncState>,
    /// Serializes backfill cycles: the timer and `sync_now` callers never
    /// scan concurrently, which is the single-writer discipline protecting
    /// the watermark.
    cycle_guard: tokio::sync::Mutex<()>,
    failure_log: Mutex<FailureLog>,
}

impl<C: ChainReader> SyncEngine<C> {
    /// Create an engine writing through the default ledger sink.
    pub fn new(config: SyncConfig, client: C, ledger: Arc<dyn Ledger>) -> Self {
        let sink: Arc<dyn EventSink> = Arc::new(LedgerSink::new(ledger.clone()));
        Self::with_sink(config, client, ledger, sink)
    }

    /// Create an engine with an explicit sink (both paths deliver into it).
    pub fn with_sink(
        config: SyncConfig,
        client: C,
        ledger: Arc<dyn Ledger>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let fetcher = LogFetcher::new(client, config.max_block_range);
        Self {
            config,
            fetcher,
            ledger,
            sink,
            watermark: Mutex::new(None),
            state: Mutex::new(SyncState::Idle),
            cycle_guard: tokio::sync::Mutex::new(()),
            failure_log: Mutex::new(FailureLog::default()),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.lock().unwrap() = state;
    }

    /// The in-memory watermark, if initialized.
    pub fn watermark(&self) -> Option<u64> {
        self.watermark.lock().unwrap().map(|w| w.block_number())
    }

    /// Run one backfill cycle now, serialized against the timer.
    pub async fn sync_now(&self) -> Result<CycleOutcome, SyncError> {
        let _guard = self.cycle_guard.lock().await;
        self.set_state(SyncState::Scanning);
        let result = self.run_cycle().await;
        self.set_state(SyncState::Live);
        result
    }

    /// Scan an explicit historical range through the same fetch/normalize/
    /// persist path, without moving the watermark. Idempotent writes make
    /// overlap with already-synced ranges harmless.
    pub async fn backfill_range(&self, from: u64, to: u64) -> Result<CycleOutcome, SyncError> {
        let _guard = self.cycle_guard.lock().await;
        self.set_state(SyncState::Scanning);
        let result = self.scan_and_persist(from, to).await;
        self.set_state(SyncState::Live);
        result
    }

    /// Current chain height and store connectivity.
    pub async fn health(&self) -> HealthStatus {
        HealthStatus {
            chain_height: self.fetcher.current_height().await.ok(),
            store_connected: self.ledger.ping().await.is_ok(),
            watermark: self.watermark(),
            state: self.state(),
        }
    }

    // ── Cycle internals ───────────────────────────────────────────────────────

    /// Resolve the watermark: in-memory, else the ledger's stored value,
    /// else current chain height (historical backfill is explicit, not
    /// automatic). Only called while holding the cycle guard.
    async fn ensure_watermark(&self) -> Result<u64, SyncError> {
        if let Some(wm) = *self.watermark.lock().unwrap() {
            return Ok(wm.block_number());
        }
        let initial = match self.ledger.watermark().await? {
            Some(stored) => {
                tracing::info!(block = stored, "resuming from stored watermark");
                stored
            }
            None => {
                let height = self.fetcher.current_height().await?;
                self.ledger.advance_watermark(height).await?;
                tracing::info!(block = height, "initialized watermark at chain head");
                height
            }
        };
        *self.watermark.lock().unwrap() = Some(Watermark::new(initial));
        Ok(initial)
    }

    async fn run_cycle(&self) -> Result<CycleOutcome, SyncError> {
        let height = self.fetcher.current_height().await?;
        let watermark = self.ensure_watermark().await?;
        if height <= watermark {
            return Ok(CycleOutcome::noop(watermark));
        }

        let outcome = self.scan_and_persist(watermark + 1, height).await?;

        // Every record in the range is durable; only now does the
        // watermark move.
        self.ledger.advance_watermark(height).await?;
        if let Some(wm) = self.watermark.lock().unwrap().as_mut() {
            wm.advance(height);
        }

        tracing::info!(
            from = outcome.from_block,
            to = outcome.to_block,
            registrations = outcome.registrations,
            transfers = outcome.transfers,
            skipped = outcome.skipped,
            "sync cycle complete"
        );
        Ok(outcome)
    }

    async fn scan_and_persist(&self, from: u64, to: u64) -> Result<CycleOutcome, SyncError> {
        let reg_logs = self.fetcher.logs(EventKind::Registration, from, to).await?;
        let xfer_logs = self.fetcher.logs(EventKind::Transfer, from, to).await?;

        let mut outcome = CycleOutcome {
            from_block: from,
            to_block: to,
            ..Default::default()
        };

        let mut cache = TimestampCache::new();
        let mut events = Vec::with_capacity(reg_logs.len() + xfer_logs.len());
        for log in reg_logs.iter().chain(xfer_logs.iter()) {
            if log.is_removed() {
                continue;
            }
            let block_ts = cache
                .get(self.fetcher.client(), log.block_number_u64())
                .await?;
            match normalize(log, block_ts) {
                Ok(event) => events.push(event),
                Err(e) if e.is_per_record() => {
                    tracing::warn!(
                        error = %e,
                        tx_hash = %log.tx_hash,
                        block = log.block_number_u64(),
                        "skipping undecodable log"
                    );
                    outcome.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        for event in events {
            let is_registration = matches!(event, AssetEvent::Registered(_));
            self.sink.receive(event).await?;
            if is_registration {
                outcome.registrations += 1;
            } else {
                outcome.transfers += 1;
            }
        }

        Ok(outcome)
    }

    // ── Scheduling ────────────────────────────────────────────────────────────

    /// Drive the backfill cycle on a fixed interval until `shutdown` fires.
    ///
    /// The stop signal is observed between cycles only: an in-flight cycle's
    /// persistence always runs to completion.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = period.as_secs(),
            contract = %self.config.contract_address,
            "sync engine started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            match self.sync_now().await {
                Ok(outcome) if outcome.is_noop() => {
                    tracing::trace!(watermark = outcome.to_block, "no new blocks");
                }
                Ok(_) => self.clear_failures(),
                Err(e) => self.note_cycle_failure(&e),
            }

            if *shutdown.borrow() {
                break;
            }
        }

        self.set_state(SyncState::Stopping);
        // Wait for any concurrent sync_now caller to drain its writes.
        let _guard = self.cycle_guard.lock().await;
        self.set_state(SyncState::Stopped);
        tracing::info!("sync engine stopped");
    }

    /// Forward pushed logs from a live subscription into the shared write
    /// path. Resubscribes with a delay when the stream drops.
    pub async fn run_live(
        self: Arc<Self>,
        stream: Arc<dyn LogStream>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let retry = Duration::from_secs(self.config.poll_interval_secs.max(1));
        loop {
            let mut rx = match stream.subscribe().await {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::warn!(error = %e, "live subscription failed; retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(retry) => continue,
                        _ = shutdown.changed() => return,
                    }
                }
            };
            tracing::info!("live subscription attached");

            loop {
                tokio::select! {
                    maybe_log = rx.recv() => match maybe_log {
                        Some(log) => {
                            if let Err(e) = self.apply_live(&log).await {
                                tracing::warn!(
                                    error = %e,
                                    tx_hash = %log.tx_hash,
                                    "live event not persisted; backfill will recover it"
                                );
                            }
                        }
                        None => {
                            tracing::warn!("live subscription closed; resubscribing");
                            break;
                        }
                    },
                    _ = shutdown.changed() => return,
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(retry) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Persist one pushed log through the shared sink. Never touches the
    /// watermark.
    pub async fn apply_live(&self, log: &RawLog) -> Result<(), SyncError> {
        if log.is_removed() {
            return Ok(());
        }
        let block_ts = self.fetcher.block_timestamp(log.block_number_u64()).await?;
        let event = normalize(log, block_ts)?;
        tracing::debug!(
            asset_id = event.asset_id(),
            block = event.block_number(),
            "live event received"
        );
        self.sink.receive(event).await
    }

    // ── Failure logging ───────────────────────────────────────────────────────

    /// Warn once per distinct failure; repeats of the same failure drop to
    /// debug so an unreachable node doesn't flood the log at every tick.
    fn note_cycle_failure(&self, err: &SyncError) {
        let msg = err.to_string();
        let mut log = self.failure_log.lock().unwrap();
        if log.last.as_deref() == Some(msg.as_str()) {
            log.repeats += 1;
            tracing::debug!(error = %msg, repeats = log.repeats, "sync cycle failed (repeat)");
        } else {
            tracing::warn!(error = %msg, "sync cycle failed; will retry next tick");
            log.last = Some(msg);
            log.repeats = 0;
        }
    }

    fn clear_failures(&self) {
        let mut log = self.failure_log.lock().unwrap();
        if let Some(last) = log.last.take() {
            if log.repeats > 0 {
                tracing::info!(error = %last, repeats = log.repeats, "sync recovered");
            }
            log.repeats = 0;
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
