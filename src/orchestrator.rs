//! Relay Orchestrator
//!
//! Composes both chains into two relay directions and owns every task for
//! the lifetime of the process. Per direction it runs one submission
//! worker, one live listener and one catch-up reconciler.

use std::sync::Arc;

use eyre::{Result, WrapErr};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::bounded_cache::BoundedHashCache;
use crate::config::{Config, RelayConfig, ServerConfig};
use crate::endpoint::ChainEndpoint;
use crate::metrics::Metrics;
use crate::proxy::{PoolContract, PoolProxy};
use crate::relay::{
    CatchUpReconciler, CatchUpSettings, ChainWindow, LiveRelayListener, RelayDirection,
};
use crate::server::{self, AppState, DirectionStatus};
use crate::writers::retry::RetryConfig;
use crate::writers::{SubmissionQueue, SubmissionWorker};

/// One chain ready to be relayed: its pool and its catch-up window
#[derive(Clone)]
pub struct RelayChain {
    pub pool: Arc<dyn PoolProxy>,
    pub window: ChainWindow,
}

pub struct Orchestrator {
    chain_a: RelayChain,
    chain_b: RelayChain,
    relay: RelayConfig,
    retry: RetryConfig,
    server: Option<ServerConfig>,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    /// Connect to both chains and validate the deployment.
    ///
    /// Fails if either RPC serves an unexpected chain id or either pool
    /// address holds no code.
    pub async fn new(config: Config) -> Result<Self> {
        let mut chains = Vec::with_capacity(2);

        for chain_config in [&config.chain_a, &config.chain_b] {
            let endpoint = ChainEndpoint::new(chain_config, &config.relay)?;
            let pool = PoolContract::new(endpoint, chain_config.pool_address);

            pool.verify_deployment()
                .await
                .wrap_err_with(|| format!("Startup check failed for {}", chain_config.name))?;

            if let Err(e) = pool.log_parameters().await {
                warn!(
                    chain = %chain_config.name,
                    error = %e,
                    "Could not read pool parameters"
                );
            }

            chains.push(RelayChain {
                pool: Arc::new(pool),
                window: ChainWindow::from(chain_config),
            });
        }

        let chain_b = chains.pop().ok_or_else(|| eyre::eyre!("chain B not built"))?;
        let chain_a = chains.pop().ok_or_else(|| eyre::eyre!("chain A not built"))?;

        let mut orchestrator = Self::from_chains(chain_a, chain_b, config.relay)?;
        orchestrator.server = config.server;
        Ok(orchestrator)
    }

    /// Compose from any pair of pools, without startup checks.
    pub fn from_chains(chain_a: RelayChain, chain_b: RelayChain, relay: RelayConfig) -> Result<Self> {
        let metrics = Metrics::new().wrap_err("Failed to register metrics")?;
        Ok(Self {
            chain_a,
            chain_b,
            relay,
            retry: RetryConfig::default(),
            server: None,
            metrics: Arc::new(metrics),
        })
    }

    /// Shorthand for [`Self::from_chains`] with default windows.
    pub fn from_proxies(
        chain_a: Arc<dyn PoolProxy>,
        chain_b: Arc<dyn PoolProxy>,
        relay: RelayConfig,
    ) -> Result<Self> {
        Self::from_chains(
            RelayChain {
                pool: chain_a,
                window: ChainWindow::default(),
            },
            RelayChain {
                pool: chain_b,
                window: ChainWindow::default(),
            },
            relay,
        )
    }

    /// Override read retry backoff (catch-up reads, listener resubscribe)
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Run every task until `shutdown` fires.
    ///
    /// A task that stops is logged; the rest keep running. On shutdown all
    /// tasks are aborted. Nothing is persisted, so nothing needs draining.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut join_set: JoinSet<String> = JoinSet::new();
        let mut statuses = Vec::with_capacity(2);

        let directions = [
            (
                RelayDirection::new(
                    Arc::clone(&self.chain_a.pool),
                    Arc::clone(&self.chain_b.pool),
                    true,
                ),
                self.chain_a.window,
                self.chain_b.window,
            ),
            (
                RelayDirection::new(
                    Arc::clone(&self.chain_b.pool),
                    Arc::clone(&self.chain_a.pool),
                    false,
                ),
                self.chain_b.window,
                self.chain_a.window,
            ),
        ];

        for (direction, source_window, destination_window) in directions {
            let label = direction.label().to_string();
            let (queue, receiver) = SubmissionQueue::new(
                direction.destination.chain().name.clone(),
                self.relay.queue_capacity,
            );

            let worker = SubmissionWorker::new(
                &direction,
                receiver,
                BoundedHashCache::new(
                    self.relay.relayed_cache_size,
                    self.relay.relayed_cache_ttl_secs,
                ),
                Arc::clone(&self.metrics),
            );

            let listener = LiveRelayListener::new(
                direction.clone(),
                queue.clone(),
                Arc::clone(&self.metrics),
                self.relay.live_idle_timeout,
            )
            .with_backoff(self.retry.clone());
            statuses.push(DirectionStatus {
                direction: label.clone(),
                listener: listener.state(),
            });

            let reconciler = CatchUpReconciler::new(
                direction,
                queue,
                CatchUpSettings {
                    source: source_window,
                    destination: destination_window,
                    item_delay: self.relay.item_delay,
                    interval: self.relay.catchup_interval,
                    retry: self.retry.clone(),
                },
                Arc::clone(&self.metrics),
            );

            let name = format!("worker {}", label);
            join_set.spawn(async move {
                worker.run().await;
                name
            });
            let name = format!("listener {}", label);
            join_set.spawn(async move {
                listener.run().await;
                name
            });
            let name = format!("catch-up {}", label);
            join_set.spawn(async move {
                reconciler.run().await;
                name
            });
        }

        if let Some(server_config) = self.server.clone() {
            let state = AppState {
                directions: statuses,
                metrics: Arc::clone(&self.metrics),
            };
            join_set.spawn(async move {
                if let Err(e) =
                    server::start_server(&server_config.bind_address, server_config.port, state)
                        .await
                {
                    error!(error = %e, "Health server stopped");
                }
                "health server".to_string()
            });
        }

        info!(
            chain_a = %self.chain_a.pool.chain(),
            chain_b = %self.chain_b.pool.chain(),
            tasks = join_set.len(),
            "Relay orchestrator running"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, stopping relay tasks");
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    return Ok(());
                }
                Some(finished) = join_set.join_next() => {
                    match finished {
                        Ok(name) if name.starts_with("catch-up") && self.relay.catchup_interval.is_none() => {
                            info!(task = %name, "Task finished");
                        }
                        Ok(name) => {
                            warn!(task = %name, "Task exited unexpectedly");
                        }
                        Err(e) => {
                            error!(error = %e, "Relay task panicked");
                        }
                    }
                }
            }
        }
    }
}
