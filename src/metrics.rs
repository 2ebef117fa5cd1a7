//! Prometheus metrics for the relay engine
//!
//! One [`Metrics`] instance with its own registry is created by the
//! orchestrator and shared as `Arc<Metrics>` with every task.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

pub struct Metrics {
    /// Transfer-ins observed, by direction and path (live | catchup)
    pub events_detected: IntCounterVec,
    /// Submission outcomes, by direction, path and outcome
    pub submissions: IntCounterVec,
    /// Transfer-ins skipped because a payout already exists
    pub already_relayed: IntCounterVec,
    /// Catch-up passes, by direction and result (ok | error)
    pub catchup_passes: IntCounterVec,
    /// Last observed head per chain
    pub chain_height: IntGaugeVec,
    /// Live subscriptions established, by direction
    pub subscriptions: IntCounterVec,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let events_detected = IntCounterVec::new(
            Opts::new(
                "relayer_events_detected_total",
                "Total CrossChainTransferIn events observed",
            ),
            &["direction", "path"],
        )?;
        let submissions = IntCounterVec::new(
            Opts::new(
                "relayer_submissions_total",
                "Total transfer-out submissions by outcome",
            ),
            &["direction", "path", "outcome"],
        )?;
        let already_relayed = IntCounterVec::new(
            Opts::new(
                "relayer_already_relayed_total",
                "Total transfer-ins skipped because a payout already exists",
            ),
            &["direction"],
        )?;
        let catchup_passes = IntCounterVec::new(
            Opts::new("relayer_catchup_passes_total", "Total catch-up passes"),
            &["direction", "result"],
        )?;
        let chain_height = IntGaugeVec::new(
            Opts::new("relayer_chain_height", "Last observed block height"),
            &["chain"],
        )?;
        let subscriptions = IntCounterVec::new(
            Opts::new(
                "relayer_subscriptions_total",
                "Total live subscriptions established",
            ),
            &["direction"],
        )?;

        registry.register(Box::new(events_detected.clone()))?;
        registry.register(Box::new(submissions.clone()))?;
        registry.register(Box::new(already_relayed.clone()))?;
        registry.register(Box::new(catchup_passes.clone()))?;
        registry.register(Box::new(chain_height.clone()))?;
        registry.register(Box::new(subscriptions.clone()))?;

        Ok(Self {
            events_detected,
            submissions,
            already_relayed,
            catchup_passes,
            chain_height,
            subscriptions,
            registry,
        })
    }

    /// Sum of `relayer_submissions_total` for a direction and outcome,
    /// across both paths
    pub fn submission_count(&self, direction: &str, outcome: &str) -> u64 {
        ["live", "catchup"]
            .into_iter()
            .map(|path| {
                self.submissions
                    .with_label_values(&[direction, path, outcome])
                    .get()
            })
            .sum()
    }
}
