//! Relay error taxonomy
//!
//! Every failure the relay core can observe on a chain maps to one of these
//! variants. Callers decide per variant whether to retry, shrink a query, or
//! drop a single submission; none of them is fatal outside startup.

use std::time::Duration;

use alloy::primitives::TxHash;
use thiserror::Error;

use crate::writers::retry::{classify_error, ErrorClass};

#[derive(Debug, Error)]
pub enum RelayError {
    /// Network or provider-level failure. Transient.
    #[error("endpoint unavailable on {chain}: {message}")]
    EndpointUnavailable { chain: String, message: String },

    /// The provider refused the log query span; the caller must shrink it.
    #[error("block range {from}..={to} too large for {chain}")]
    RangeTooLarge { chain: String, from: u64, to: u64 },

    /// Invalid nonce, underpriced, reverted, or otherwise refused.
    #[error("submission rejected on {chain}: {reason}")]
    SubmissionRejected { chain: String, reason: String },

    /// Submission or inclusion did not finish within the configured bound.
    /// The transaction may still be mined later.
    #[error("confirmation timed out on {chain} after {waited:?} (tx {tx_hash:?})")]
    ConfirmationTimeout {
        chain: String,
        tx_hash: Option<TxHash>,
        waited: Duration,
    },

    #[error("failed to decode {event} log: {message}")]
    Decode { event: &'static str, message: String },

    #[error("submission queue for {chain} is closed")]
    QueueClosed { chain: String },
}

impl RelayError {
    /// Map a provider error raised by a read (height, logs, receipts).
    pub fn from_read(chain: &str, from: u64, to: u64, error: impl ToString) -> Self {
        let message = error.to_string();
        match classify_error(&message) {
            ErrorClass::RangeTooLarge => RelayError::RangeTooLarge {
                chain: chain.to_string(),
                from,
                to,
            },
            _ => RelayError::EndpointUnavailable {
                chain: chain.to_string(),
                message,
            },
        }
    }

    /// Map a provider error raised while sending a transaction.
    pub fn from_submit(chain: &str, error: impl ToString) -> Self {
        let message = error.to_string();
        match classify_error(&message) {
            ErrorClass::Transient => RelayError::EndpointUnavailable {
                chain: chain.to_string(),
                message,
            },
            _ => RelayError::SubmissionRejected {
                chain: chain.to_string(),
                reason: message,
            },
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::EndpointUnavailable { .. })
    }

    /// Short stable label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::EndpointUnavailable { .. } => "endpoint_unavailable",
            RelayError::RangeTooLarge { .. } => "range_too_large",
            RelayError::SubmissionRejected { .. } => "submission_rejected",
            RelayError::ConfirmationTimeout { .. } => "confirmation_timeout",
            RelayError::Decode { .. } => "decode",
            RelayError::QueueClosed { .. } => "queue_closed",
        }
    }
}
