//! Event signatures for the indexed contract.
//!
//! `topics[0]` of an EVM log is the keccak256 hash of the event's Solidity
//! signature; the two signatures here are fixed by the contract ABI.

use tiny_keccak::{Hasher, Keccak};

/// The two event kinds the engine indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `AssetRegistered(uint256 indexed assetId, address indexed owner,
    /// string description, uint256 timestamp)`
    Registration,
    /// `OwnershipTransferred(uint256 indexed assetId, address indexed
    /// previousOwner, address indexed newOwner, uint256 timestamp)`
    Transfer,
}

impl EventKind {
    /// The canonical Solidity signature (no parameter names, no `indexed`).
    pub fn signature(&self) -> &'static str {
        match self {
            Self::Registration => "AssetRegistered(uint256,address,string,uint256)",
            Self::Transfer => "OwnershipTransferred(uint256,address,address,uint256)",
        }
    }

    /// `topics[0]` value for this event: `0x` + keccak256(signature).
    pub fn topic0(&self) -> String {
        keccak256_hex(self.signature())
    }

    /// Match a log's `topics[0]` to an event kind (case-insensitive).
    pub fn from_topic0(topic0: &str) -> Option<Self> {
        for kind in [Self::Registration, Self::Transfer] {
            if kind.topic0().eq_ignore_ascii_case(topic0) {
                return Some(kind);
            }
        }
        None
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registration => write!(f, "registration"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

fn keccak256_hex(input: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(input.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}
