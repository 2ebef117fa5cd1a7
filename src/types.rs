//! Relay data model
//!
//! Decoded pool events, the transfer-out argument tuple derived from them, and
//! the in-memory items that move through a relay direction.

use std::fmt;

use alloy::primitives::{Address, TxHash, B256, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RelayError;

/// Identity of one chain as seen by the relayer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainInfo {
    /// Human readable label used in logs and metrics
    pub name: String,
    /// Native EVM chain id
    pub chain_id: u64,
}

impl ChainInfo {
    pub fn new(name: impl Into<String>, chain_id: u64) -> Self {
        Self {
            name: name.into(),
            chain_id,
        }
    }
}

impl fmt::Display for ChainInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.chain_id)
    }
}

/// A `CrossChainTransferIn` deposit observed on a source pool.
///
/// Uniquely identified by `origin_tx_hash`, the hash of the depositing
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferInEvent {
    pub origin_chain_id: U256,
    pub wallet_address: Address,
    /// Zero address means the chain's native currency
    pub token_address: Address,
    pub amount: U256,
    pub fees: U256,
    pub origin_tx_hash: B256,
    pub block_height: u64,
    pub log_index: u64,
}

impl TransferInEvent {
    /// The `crossChainTransferOut` arguments that pay this deposit out.
    pub fn transfer_out_request(&self) -> TransferOutRequest {
        TransferOutRequest {
            origin_tx_hash: self.origin_tx_hash,
            origin_chain_id: self.origin_chain_id,
            token_address: self.token_address,
            wallet_address: self.wallet_address,
            amount: self.amount,
        }
    }

    pub fn is_native(&self) -> bool {
        self.token_address == Address::ZERO
    }
}

/// A `CrossChainTransferOut` payout emitted by a destination pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutEvent {
    /// Idempotency key: the transfer-in's originating transaction hash
    pub origin_tx_hash: B256,
    pub origin_chain_id: U256,
    pub token_address: Address,
    pub wallet_address: Address,
    pub amount: U256,
    pub block_height: u64,
    /// Hash of the payout transaction itself
    pub tx_hash: B256,
}

/// Every pool event the relayer understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    TransferIn(TransferInEvent),
    TransferOut(TransferOutEvent),
}

/// Arguments of `crossChainTransferOut`, in ABI order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOutRequest {
    pub origin_tx_hash: B256,
    pub origin_chain_id: U256,
    pub token_address: Address,
    pub wallet_address: Address,
    pub amount: U256,
}

/// How an item reached the submission queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelayPath {
    Live,
    CatchUp,
}

impl RelayPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayPath::Live => "live",
            RelayPath::CatchUp => "catchup",
        }
    }
}

impl fmt::Display for RelayPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transfer-in waiting for its transfer-out. Lives in memory only.
#[derive(Debug, Clone)]
pub struct PendingRelayItem {
    pub event: TransferInEvent,
    pub request: TransferOutRequest,
    pub path: RelayPath,
    pub detected_at: DateTime<Utc>,
}

impl PendingRelayItem {
    pub fn new(event: TransferInEvent, path: RelayPath) -> Self {
        let request = event.transfer_out_request();
        Self {
            event,
            request,
            path,
            detected_at: Utc::now(),
        }
    }

    pub fn origin_tx_hash(&self) -> B256 {
        self.request.origin_tx_hash
    }
}

/// Handle to a transfer-out that has been broadcast but not yet confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransfer {
    pub tx_hash: TxHash,
    pub origin_tx_hash: B256,
}

/// Inclusion receipt of a transfer-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

/// Result of pushing one item through a submission worker
#[derive(Debug)]
pub enum RelayOutcome {
    /// Submitted and confirmed
    Relayed(TransferReceipt),
    /// This process already confirmed a payout for the same hash
    AlreadyRelayed,
    Failed(RelayError),
}

impl RelayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::Relayed(_) => "relayed",
            RelayOutcome::AlreadyRelayed => "already_relayed",
            RelayOutcome::Failed(_) => "failed",
        }
    }
}
