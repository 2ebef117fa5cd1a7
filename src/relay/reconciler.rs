//! Catch-Up Reconciler
//!
//! Re-discovers transfer-ins from a trailing window of the source chain and
//! submits those with no matching payout in the destination's trailing
//! window. Submissions are paced so consecutive catch-up attempts start at
//! least `item_delay` apart, measured from when the submission worker
//! actually sent each one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::dedup::RelayedIndex;
use crate::error::RelayError;
use crate::metrics::Metrics;
use crate::relay::{ChainWindow, RelayDirection};
use crate::types::{PendingRelayItem, RelayOutcome, RelayPath, TransferInEvent};
use crate::writers::retry::{with_retry, RetryConfig};
use crate::writers::SubmissionQueue;

/// Window and pacing for one direction's passes
#[derive(Debug, Clone)]
pub struct CatchUpSettings {
    pub source: ChainWindow,
    pub destination: ChainWindow,
    /// Minimum spacing between submission attempts
    pub item_delay: Duration,
    /// Time between passes; `None` runs once
    pub interval: Option<Duration>,
    /// Backoff for height and log reads
    pub retry: RetryConfig,
}

/// Counts from one pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub transfer_ins: usize,
    pub already_relayed: usize,
    /// Repeated hashes within the same pass
    pub duplicates: usize,
    pub submitted: usize,
    pub relayed: usize,
    pub failed: usize,
}

pub struct CatchUpReconciler {
    direction: RelayDirection,
    queue: SubmissionQueue,
    settings: CatchUpSettings,
    metrics: Arc<Metrics>,
}

impl CatchUpReconciler {
    pub fn new(
        direction: RelayDirection,
        queue: SubmissionQueue,
        settings: CatchUpSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            direction,
            queue,
            settings,
            metrics,
        }
    }

    /// Run passes until the task is aborted, or a single pass when no
    /// interval is configured.
    pub async fn run(self) {
        let Some(period) = self.settings.interval else {
            self.run_logged_pass().await;
            info!(direction = %self.direction, "Catch-up finished (single pass)");
            return;
        };

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.run_logged_pass().await;
        }
    }

    async fn run_logged_pass(&self) {
        let label = self.direction.label();
        match self.run_pass().await {
            Ok(report) => {
                self.metrics
                    .catchup_passes
                    .with_label_values(&[label, "ok"])
                    .inc();
                info!(
                    direction = label,
                    primary = self.direction.primary,
                    transfer_ins = report.transfer_ins,
                    already_relayed = report.already_relayed,
                    duplicates = report.duplicates,
                    submitted = report.submitted,
                    relayed = report.relayed,
                    failed = report.failed,
                    "Catch-up pass complete"
                );
            }
            Err(e) => {
                self.metrics
                    .catchup_passes
                    .with_label_values(&[label, "error"])
                    .inc();
                error!(
                    direction = label,
                    primary = self.direction.primary,
                    error_kind = e.kind(),
                    error = %e,
                    "Catch-up pass aborted, nothing submitted"
                );
            }
        }
    }

    /// One reconciliation pass.
    ///
    /// A failed height or log read ends the pass before anything is
    /// submitted. Individual submission failures are counted and skipped.
    pub async fn run_pass(&self) -> Result<PassReport, RelayError> {
        let label = self.direction.label();
        let source = &self.direction.source;
        let destination = &self.direction.destination;
        let retry = &self.settings.retry;

        let source_height = with_retry(retry, "source height", || source.current_height()).await?;
        let destination_height =
            with_retry(retry, "destination height", || destination.current_height()).await?;
        self.record_height(source.chain().name.as_str(), source_height);
        self.record_height(destination.chain().name.as_str(), destination_height);

        let (out_from, out_to) = destination_range(destination_height, self.settings.destination);
        let transfer_outs = with_retry(retry, "transfer-out logs", || {
            destination.query_transfer_outs(out_from, out_to)
        })
        .await?;

        let mut transfer_ins = match source_range(source_height, self.settings.source) {
            Some((in_from, in_to)) => {
                with_retry(retry, "transfer-in logs", || {
                    source.query_transfer_ins(in_from, in_to)
                })
                .await?
            }
            None => Vec::new(),
        };
        transfer_ins.sort_by_key(|e| (e.block_height, e.log_index));

        debug!(
            direction = label,
            source_height,
            destination_height,
            transfer_ins = transfer_ins.len(),
            transfer_outs = transfer_outs.len(),
            "Catch-up windows scanned"
        );

        let relayed = RelayedIndex::from_events(&transfer_outs);
        let (pending, mut report) = select_pending(transfer_ins, &relayed);

        self.metrics
            .events_detected
            .with_label_values(&[label, RelayPath::CatchUp.as_str()])
            .inc_by(report.transfer_ins as u64);
        self.metrics
            .already_relayed
            .with_label_values(&[label])
            .inc_by(report.already_relayed as u64);

        if pending.is_empty() {
            return Ok(report);
        }

        let mut last_attempt: Option<Instant> = None;

        for event in pending {
            // Live items share the queue, so the previous attempt may have
            // started well after it was queued.
            if let Some(at) = last_attempt {
                sleep_until(at + self.settings.item_delay).await;
            }

            let origin_tx_hash = event.origin_tx_hash;
            info!(
                direction = label,
                origin_tx_hash = %origin_tx_hash,
                block = event.block_height,
                "Relaying missed transfer-in"
            );

            report.submitted += 1;
            let result = self
                .queue
                .submit_and_wait(PendingRelayItem::new(event, RelayPath::CatchUp))
                .await;
            if result.attempted_at.is_some() {
                last_attempt = result.attempted_at;
            }

            match result.outcome {
                RelayOutcome::Relayed(_) => report.relayed += 1,
                RelayOutcome::AlreadyRelayed => report.already_relayed += 1,
                RelayOutcome::Failed(RelayError::QueueClosed { chain }) => {
                    return Err(RelayError::QueueClosed { chain });
                }
                RelayOutcome::Failed(_) => report.failed += 1,
            }
        }

        Ok(report)
    }

    fn record_height(&self, chain: &str, height: u64) {
        self.metrics
            .chain_height
            .with_label_values(&[chain])
            .set(i64::try_from(height).unwrap_or(i64::MAX));
    }
}

/// `[height - window, height]` on the destination, clamped at genesis
fn destination_range(height: u64, window: ChainWindow) -> (u64, u64) {
    (height.saturating_sub(window.window_blocks), height)
}

/// `[height - window, height - finality]` on the source, or `None` when the
/// finality margin swallows the whole window
fn source_range(height: u64, window: ChainWindow) -> Option<(u64, u64)> {
    let from = height.saturating_sub(window.window_blocks);
    let to = height.checked_sub(window.finality_blocks)?;
    (from <= to).then_some((from, to))
}

/// Drop transfer-ins already paid out and repeated hashes, keeping order.
fn select_pending(
    transfer_ins: Vec<TransferInEvent>,
    relayed: &RelayedIndex,
) -> (Vec<TransferInEvent>, PassReport) {
    let mut report = PassReport {
        transfer_ins: transfer_ins.len(),
        ..PassReport::default()
    };
    let mut seen = HashSet::new();
    let mut pending = Vec::new();

    for event in transfer_ins {
        if relayed.already_relayed(&event.origin_tx_hash) {
            report.already_relayed += 1;
            continue;
        }
        if !seen.insert(event.origin_tx_hash) {
            report.duplicates += 1;
            continue;
        }
        pending.push(event);
    }

    (pending, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransferOutEvent;
    use alloy::primitives::{Address, B256, U256};

    fn transfer_in(byte: u8, block: u64, log_index: u64) -> TransferInEvent {
        TransferInEvent {
            origin_chain_id: U256::from(534351u64),
            wallet_address: Address::repeat_byte(0x11),
            token_address: Address::ZERO,
            amount: U256::from(1000u64),
            fees: U256::ZERO,
            origin_tx_hash: B256::repeat_byte(byte),
            block_height: block,
            log_index,
        }
    }

    fn payout(byte: u8) -> TransferOutEvent {
        TransferOutEvent {
            origin_tx_hash: B256::repeat_byte(byte),
            origin_chain_id: U256::from(534351u64),
            token_address: Address::ZERO,
            wallet_address: Address::repeat_byte(0x11),
            amount: U256::from(1000u64),
            block_height: 1,
            tx_hash: B256::ZERO,
        }
    }

    fn window(window_blocks: u64, finality_blocks: u64) -> ChainWindow {
        ChainWindow {
            window_blocks,
            finality_blocks,
        }
    }

    #[test]
    fn test_ranges_clamp_at_genesis() {
        assert_eq!(destination_range(500, window(1000, 0)), (0, 500));
        assert_eq!(source_range(500, window(1000, 0)), Some((0, 500)));
        assert_eq!(destination_range(5000, window(1000, 0)), (4000, 5000));
    }

    #[test]
    fn test_source_range_finality_margin() {
        assert_eq!(source_range(5000, window(1000, 12)), Some((4000, 4988)));
        assert_eq!(source_range(10, window(1000, 12)), None);
        assert_eq!(source_range(100, window(10, 20)), None);
    }

    #[test]
    fn test_select_pending_skips_relayed_and_duplicates() {
        let ins = vec![
            transfer_in(0xaa, 10, 0),
            transfer_in(0xbb, 11, 0),
            transfer_in(0xbb, 11, 1),
            transfer_in(0xcc, 12, 0),
        ];
        let relayed = RelayedIndex::from_events(&[payout(0xaa)]);

        let (pending, report) = select_pending(ins, &relayed);

        let hashes: Vec<_> = pending.iter().map(|e| e.origin_tx_hash).collect();
        assert_eq!(hashes, vec![B256::repeat_byte(0xbb), B256::repeat_byte(0xcc)]);
        assert_eq!(report.transfer_ins, 4);
        assert_eq!(report.already_relayed, 1);
        assert_eq!(report.duplicates, 1);
    }
}
