//! Live Relay Listener
//!
//! Forwards every transfer-in the source pool emits to the destination's
//! submission queue as soon as it arrives. No dedup query is made on this
//! path; the worker's relayed cache and the contract itself guard against
//! double payouts.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::error::RelayError;
use crate::metrics::Metrics;
use crate::relay::RelayDirection;
use crate::types::{PendingRelayItem, RelayPath, TransferInEvent};
use crate::writers::retry::RetryConfig;
use crate::writers::SubmissionQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    Idle,
    Listening,
}

/// Why a subscription stopped delivering events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Closed,
    IdleTimeout,
    QueueClosed,
}

pub struct LiveRelayListener {
    direction: RelayDirection,
    queue: SubmissionQueue,
    metrics: Arc<Metrics>,
    /// Resubscribe when nothing arrived for this long
    idle_timeout: Option<Duration>,
    /// Backoff between resubscribe attempts
    backoff: RetryConfig,
    state: watch::Sender<ListenerState>,
}

impl LiveRelayListener {
    pub fn new(
        direction: RelayDirection,
        queue: SubmissionQueue,
        metrics: Arc<Metrics>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            direction,
            queue,
            metrics,
            idle_timeout,
            backoff: RetryConfig::default(),
            state,
        }
    }

    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Observe `Idle`/`Listening` transitions
    pub fn state(&self) -> watch::Receiver<ListenerState> {
        self.state.subscribe()
    }

    /// Subscribe and relay until the task is aborted or the queue closes.
    pub async fn run(self) {
        let label = self.direction.label().to_string();
        let mut attempt = 0u32;

        loop {
            match self.direction.source.subscribe_transfer_ins().await {
                Ok(stream) => {
                    attempt = 0;
                    self.state.send_replace(ListenerState::Listening);
                    self.metrics
                        .subscriptions
                        .with_label_values(&[label.as_str()])
                        .inc();
                    info!(
                        direction = %label,
                        primary = self.direction.primary,
                        "Listening for live transfer-ins"
                    );

                    match self.consume(stream).await {
                        StreamEnd::QueueClosed => {
                            self.state.send_replace(ListenerState::Idle);
                            error!(direction = %label, "Submission queue closed, live listener stopping");
                            return;
                        }
                        StreamEnd::IdleTimeout => {
                            warn!(direction = %label, idle = ?self.idle_timeout, "Live subscription idle, resubscribing");
                        }
                        StreamEnd::Closed => {
                            warn!(direction = %label, "Live subscription ended, resubscribing");
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        direction = %label,
                        attempt,
                        error_kind = e.kind(),
                        error = %e,
                        "Live subscription failed"
                    );
                }
            }

            self.state.send_replace(ListenerState::Idle);
            let delay = self.backoff.backoff_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            sleep(delay).await;
        }
    }

    async fn consume(&self, mut stream: BoxStream<'static, TransferInEvent>) -> StreamEnd {
        loop {
            let next = match self.idle_timeout {
                Some(idle) => match timeout(idle, stream.next()).await {
                    Ok(next) => next,
                    Err(_) => return StreamEnd::IdleTimeout,
                },
                None => stream.next().await,
            };

            let Some(event) = next else {
                return StreamEnd::Closed;
            };

            if self.forward(event).await.is_err() {
                return StreamEnd::QueueClosed;
            }
        }
    }

    async fn forward(&self, event: TransferInEvent) -> Result<(), RelayError> {
        let label = self.direction.label();
        self.metrics
            .events_detected
            .with_label_values(&[label, RelayPath::Live.as_str()])
            .inc();
        info!(
            direction = label,
            origin_tx_hash = %event.origin_tx_hash,
            block = event.block_height,
            wallet = %event.wallet_address,
            amount = %event.amount,
            "Transfer-in detected"
        );

        self.queue
            .enqueue_detached(PendingRelayItem::new(event, RelayPath::Live))
            .await
    }
}
