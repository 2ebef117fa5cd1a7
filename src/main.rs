//! Cross-chain pool relayer
//!
//! Watches the pool contract on two EVM chains and pays out every
//! `CrossChainTransferIn` deposit on the opposite chain.
//!
//! Each direction has two sources of work:
//! 1. A live subscription that forwards deposits as they are emitted
//! 2. A catch-up pass over a trailing block window that finds deposits with
//!    no matching `CrossChainTransferOut` and submits them, paced
//!
//! Both feed a single submission worker per destination, so payouts from one
//! signer are never in flight concurrently.

use pool_relayer::config::Config;
use pool_relayer::Orchestrator;
use tracing::info;

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting cross-chain pool relayer");

    let config = Config::load()?;
    info!(
        chain_a = %config.chain_a.name,
        chain_a_id = config.chain_a.chain_id,
        chain_a_pool = %config.chain_a.pool_address,
        chain_b = %config.chain_b.name,
        chain_b_id = config.chain_b.chain_id,
        chain_b_pool = %config.chain_b.pool_address,
        item_delay = ?config.relay.item_delay,
        catchup_interval = ?config.relay.catchup_interval,
        "Configuration loaded"
    );

    let orchestrator = Orchestrator::new(config).await?;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);

    // Handle signals
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    orchestrator.run(shutdown_rx).await?;

    info!("Cross-chain pool relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pool_relayer=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
