//! Sync watermark: the highest block known to be fully scanned and
//! durably persisted.

use serde::{Deserialize, Serialize};

/// The engine's position in the chain.
///
/// Advanced only after a whole range's events are acknowledged by the
/// ledger; never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    block_number: u64,
}

impl Watermark {
    pub fn new(block_number: u64) -> Self {
        Self { block_number }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// The first block of the next scan range (watermark + 1).
    pub fn next_block(&self) -> u64 {
        self.block_number + 1
    }

    /// Advance to `block_number`. A value at or below the current position
    /// is ignored, keeping the watermark monotonic.
    pub fn advance(&mut self, block_number: u64) -> bool {
        if block_number > self.block_number {
            self.block_number = block_number;
            true
        } else {
            false
        }
    }

    /// Returns `true` if `height` holds no blocks beyond the watermark.
    pub fn caught_up_to(&self, height: u64) -> bool {
        height <= self.block_number
    }
}
