//! Destination write path
//!
//! Every transfer-out for a destination goes through one
//! [`SubmissionWorker`]. The live listener and the catch-up reconciler only
//! hold a [`SubmissionQueue`], so a destination signer never has two
//! transactions in flight and its nonce is never contended.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bounded_cache::BoundedHashCache;
use crate::error::RelayError;
use crate::metrics::Metrics;
use crate::proxy::PoolProxy;
use crate::relay::RelayDirection;
use crate::types::{PendingRelayItem, RelayOutcome};

pub mod retry;

/// One item waiting for the worker, with an optional reply channel
#[derive(Debug)]
pub struct QueuedSubmission {
    pub item: PendingRelayItem,
    pub reply: Option<oneshot::Sender<SubmissionResult>>,
}

/// What the worker did with one queued item
#[derive(Debug)]
pub struct SubmissionResult {
    pub outcome: RelayOutcome,
    /// When the transfer-out was handed to the destination; `None` if
    /// nothing was sent
    pub attempted_at: Option<Instant>,
}

impl SubmissionResult {
    fn not_attempted(outcome: RelayOutcome) -> Self {
        Self {
            outcome,
            attempted_at: None,
        }
    }
}

/// Sending half of a direction's submission queue
#[derive(Clone, Debug)]
pub struct SubmissionQueue {
    chain: String,
    sender: mpsc::Sender<QueuedSubmission>,
}

impl SubmissionQueue {
    /// Bounded queue for the destination chain named `chain`.
    pub fn new(chain: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<QueuedSubmission>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                chain: chain.into(),
                sender,
            },
            receiver,
        )
    }

    /// Queue `item` and return a receiver for its outcome.
    pub async fn enqueue(
        &self,
        item: PendingRelayItem,
    ) -> Result<oneshot::Receiver<SubmissionResult>, RelayError> {
        let (reply, outcome) = oneshot::channel();
        self.send(QueuedSubmission {
            item,
            reply: Some(reply),
        })
        .await?;
        Ok(outcome)
    }

    /// Queue `item` without waiting for its outcome. The worker logs it.
    pub async fn enqueue_detached(&self, item: PendingRelayItem) -> Result<(), RelayError> {
        self.send(QueuedSubmission { item, reply: None }).await
    }

    /// Queue `item` and wait until the worker has finished with it.
    pub async fn submit_and_wait(&self, item: PendingRelayItem) -> SubmissionResult {
        match self.enqueue(item).await {
            Ok(result) => result.await.unwrap_or_else(|_| {
                SubmissionResult::not_attempted(RelayOutcome::Failed(RelayError::QueueClosed {
                    chain: self.chain.clone(),
                }))
            }),
            Err(e) => SubmissionResult::not_attempted(RelayOutcome::Failed(e)),
        }
    }

    async fn send(&self, submission: QueuedSubmission) -> Result<(), RelayError> {
        self.sender
            .send(submission)
            .await
            .map_err(|_| RelayError::QueueClosed {
                chain: self.chain.clone(),
            })
    }
}

/// Owns the write path of one destination: submits, confirms, and
/// remembers what it has paid out.
pub struct SubmissionWorker {
    direction: String,
    destination: Arc<dyn PoolProxy>,
    receiver: mpsc::Receiver<QueuedSubmission>,
    relayed: BoundedHashCache,
    metrics: Arc<Metrics>,
}

impl SubmissionWorker {
    pub fn new(
        direction: &RelayDirection,
        receiver: mpsc::Receiver<QueuedSubmission>,
        relayed: BoundedHashCache,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            direction: direction.label().to_string(),
            destination: Arc::clone(&direction.destination),
            receiver,
            relayed,
            metrics,
        }
    }

    /// Process submissions one at a time until every queue handle is dropped.
    pub async fn run(mut self) {
        info!(direction = %self.direction, "Submission worker started");

        while let Some(QueuedSubmission { item, reply }) = self.receiver.recv().await {
            let result = self.process(&item).await;

            self.metrics
                .submissions
                .with_label_values(&[
                    self.direction.as_str(),
                    item.path.as_str(),
                    result.outcome.as_str(),
                ])
                .inc();

            if let Some(reply) = reply {
                // The waiter may have gone away; the outcome is already logged.
                let _ = reply.send(result);
            }
        }

        info!(direction = %self.direction, "Submission worker stopped");
    }

    async fn process(&mut self, item: &PendingRelayItem) -> SubmissionResult {
        let origin_tx_hash = item.origin_tx_hash();

        if self.relayed.contains(&origin_tx_hash) {
            info!(
                direction = %self.direction,
                path = %item.path,
                origin_tx_hash = %origin_tx_hash,
                "Transfer already relayed by this process, skipping"
            );
            self.metrics
                .already_relayed
                .with_label_values(&[self.direction.as_str()])
                .inc();
            return SubmissionResult::not_attempted(RelayOutcome::AlreadyRelayed);
        }

        info!(
            direction = %self.direction,
            path = %item.path,
            origin_tx_hash = %origin_tx_hash,
            wallet = %item.request.wallet_address,
            token = %item.request.token_address,
            amount = %item.request.amount,
            "Submitting transfer-out"
        );

        let attempted_at = Instant::now();
        let attempted = |outcome| SubmissionResult {
            outcome,
            attempted_at: Some(attempted_at),
        };

        let submitted = match self.destination.submit_transfer_out(&item.request).await {
            Ok(submitted) => submitted,
            Err(e) => {
                error!(
                    direction = %self.direction,
                    path = %item.path,
                    origin_tx_hash = %origin_tx_hash,
                    error_kind = e.kind(),
                    error = %e,
                    "Transfer-out submission failed"
                );
                return attempted(RelayOutcome::Failed(e));
            }
        };

        debug!(
            direction = %self.direction,
            origin_tx_hash = %origin_tx_hash,
            tx_hash = %submitted.tx_hash,
            "Transfer-out broadcast, awaiting receipt"
        );

        match self.destination.confirm(&submitted).await {
            Ok(receipt) => {
                self.relayed.insert(origin_tx_hash);
                info!(
                    direction = %self.direction,
                    path = %item.path,
                    origin_tx_hash = %origin_tx_hash,
                    tx_hash = %receipt.tx_hash,
                    block = ?receipt.block_number,
                    "Transfer-out confirmed"
                );
                attempted(RelayOutcome::Relayed(receipt))
            }
            Err(e) => {
                warn!(
                    direction = %self.direction,
                    path = %item.path,
                    origin_tx_hash = %origin_tx_hash,
                    tx_hash = %submitted.tx_hash,
                    error_kind = e.kind(),
                    error = %e,
                    "Transfer-out not confirmed"
                );
                attempted(RelayOutcome::Failed(e))
            }
        }
    }
}
