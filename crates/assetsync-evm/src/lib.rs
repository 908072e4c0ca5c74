//! assetsync-evm: chain reader, event normalizer, and the sync engine.

pub mod engine;
pub mod normalize;
pub mod reader;
pub mod rpc;
pub mod subscription;
pub mod topics;

pub use engine::{CycleOutcome, HealthStatus, SyncEngine};
pub use normalize::normalize;
pub use reader::{ChainReader, LogFetcher, RawLog, TimestampCache};
pub use rpc::HttpChainReader;
pub use subscription::{EvmWsSubscription, LogStream};
pub use topics::EventKind;
