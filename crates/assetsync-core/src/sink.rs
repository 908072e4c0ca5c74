//! The event sink is the single write path shared by backfill and live
//! delivery.
//!
//! Both paths hand every normalized event to an [`EventSink`] rather than
//! talking to storage directly, so duplicate delivery from either side is
//! absorbed by the same idempotency rules.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::ledger::Ledger;
use crate::types::AssetEvent;

/// Receives normalized events from either sync path.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn receive(&self, event: AssetEvent) -> Result<(), SyncError>;
}

/// The default sink: idempotent writes into a [`Ledger`].
pub struct LedgerSink {
    ledger: Arc<dyn Ledger>,
}

impl LedgerSink {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl EventSink for LedgerSink {
    async fn receive(&self, event: AssetEvent) -> Result<(), SyncError> {
        match event {
            AssetEvent::Registered(reg) => {
                self.ledger.upsert_registration(&reg).await?;
            }
            AssetEvent::Transferred(xfer) => {
                self.ledger.upsert_transfer(&xfer).await?;
            }
        }
        Ok(())
    }
}
