//! Cross-chain pool relayer - Library interface
//!
//! Mirrors `CrossChainTransferIn` deposits on one EVM pool as
//! `crossChainTransferOut` payouts on the other, in both directions.
//! Re-exports internal modules for use in integration tests.

pub mod bounded_cache;
pub mod config;
pub mod contracts;
pub mod dedup;
pub mod endpoint;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod proxy;
pub mod redact;
pub mod relay;
pub mod rpc_fallback;
pub mod server;
pub mod types;
pub mod writers;

pub use error::RelayError;
pub use orchestrator::Orchestrator;
pub use proxy::PoolProxy;
