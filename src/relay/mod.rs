//! Relay directions and the two paths that feed them
//!
//! A direction moves transfer-ins from a source pool to payouts on a
//! destination pool. The live listener and the catch-up reconciler of a
//! direction share one submission queue.

use std::fmt;
use std::sync::Arc;

use crate::config::ChainConfig;
use crate::proxy::PoolProxy;

pub mod listener;
pub mod reconciler;

pub use listener::{ListenerState, LiveRelayListener};
pub use reconciler::{CatchUpReconciler, CatchUpSettings, PassReport};

/// Ordered (source, destination) pair of pools
#[derive(Clone)]
pub struct RelayDirection {
    pub source: Arc<dyn PoolProxy>,
    pub destination: Arc<dyn PoolProxy>,
    /// A→B is primary; only affects labels
    pub primary: bool,
    label: String,
}

impl RelayDirection {
    pub fn new(source: Arc<dyn PoolProxy>, destination: Arc<dyn PoolProxy>, primary: bool) -> Self {
        let label = format!("{}->{}", source.chain().name, destination.chain().name);
        Self {
            source,
            destination,
            primary,
            label,
        }
    }

    /// `source->destination`, used in logs and metric labels
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for RelayDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayDirection")
            .field("label", &self.label)
            .field("primary", &self.primary)
            .finish()
    }
}

impl fmt::Display for RelayDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Per-chain scan window for catch-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainWindow {
    pub window_blocks: u64,
    pub finality_blocks: u64,
}

impl Default for ChainWindow {
    fn default() -> Self {
        Self {
            window_blocks: 1000,
            finality_blocks: 0,
        }
    }
}

impl From<&ChainConfig> for ChainWindow {
    fn from(config: &ChainConfig) -> Self {
        Self {
            window_blocks: config.window_blocks,
            finality_blocks: config.finality_blocks,
        }
    }
}
