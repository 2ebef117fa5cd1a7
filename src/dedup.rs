//! Dedup Oracle
//!
//! Answers whether a transfer-in has already been paid out, by membership of
//! its origin transaction hash in the opposite chain's transfer-out history.
//! A hash outside the queried window reads as "not relayed".

use std::collections::HashSet;

use alloy::primitives::B256;

use crate::types::TransferOutEvent;

/// True if any candidate transfer-out carries `origin_tx_hash`.
pub fn already_relayed(origin_tx_hash: &B256, candidates: &[TransferOutEvent]) -> bool {
    candidates
        .iter()
        .any(|out| out.origin_tx_hash == *origin_tx_hash)
}

/// Set of origin hashes paid out within one queried window
#[derive(Debug, Default, Clone)]
pub struct RelayedIndex {
    hashes: HashSet<B256>,
}

impl RelayedIndex {
    pub fn from_events(candidates: &[TransferOutEvent]) -> Self {
        Self {
            hashes: candidates.iter().map(|out| out.origin_tx_hash).collect(),
        }
    }

    pub fn already_relayed(&self, origin_tx_hash: &B256) -> bool {
        self.hashes.contains(origin_tx_hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
