//! assetsync-core: foundation for the ownership-event sync engine.
//!
//! # Architecture
//!
//! ```text
//! SyncEngine (assetsync-evm)
//!     ├── ChainReader / LogFetcher  (height, logs, range bisection)
//!     ├── EventNormalizer           (raw log → Registration | Transfer)
//!     ├── Watermark                 (last durably-processed block)
//!     ├── EventSink                 (shared backfill + live write path)
//!     └── Ledger backend            (memory / SQLite / Postgres)
//! ```

pub mod config;
pub mod error;
pub mod ledger;
pub mod sink;
pub mod types;
pub mod watermark;

pub use config::{SyncConfig, SyncState};
pub use error::SyncError;
pub use ledger::Ledger;
pub use sink::{EventSink, LedgerSink};
pub use types::{
    normalize_address, AssetEvent, AssetRow, LedgerStats, OwnerActivity, Registration, Transfer,
};
pub use watermark::Watermark;
