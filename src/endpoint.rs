//! Chain Endpoint
//!
//! Thin async wrapper over one EVM chain: block height, log queries,
//! log subscriptions, transaction submission and receipt polling. Every
//! failure is mapped onto [`RelayError`] so callers never see raw transport
//! errors.

use std::collections::VecDeque;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Bytes, TxHash, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{Client, Http};
use eyre::{eyre, Result, WrapErr};
use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{ChainConfig, RelayConfig};
use crate::error::RelayError;
use crate::rpc_fallback::{create_providers, with_fallback};
use crate::types::{ChainInfo, TransferReceipt};

/// One chain as seen by the relayer.
///
/// Cheap to clone: providers share their HTTP client internally.
#[derive(Clone)]
pub struct ChainEndpoint {
    chain: ChainInfo,
    read_providers: Vec<RootProvider<Http<Client>>>,
    write_url: Url,
    ws_url: Option<String>,
    wallet: EthereumWallet,
    signer_address: Address,
    max_block_range: u64,
    poll_interval: Duration,
    submit_timeout: Duration,
    confirm_timeout: Duration,
    confirm_poll_interval: Duration,
}

impl ChainEndpoint {
    pub fn new(config: &ChainConfig, relay: &RelayConfig) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(config.private_key.expose())
            .map_err(|_| eyre!("Invalid private key for {}", config.name))?;
        let signer_address = signer.address();

        let urls = config.all_rpc_urls();
        let read_providers = create_providers(&urls)?;
        let write_url = Url::parse(&config.rpc_url)
            .wrap_err_with(|| format!("Invalid RPC URL for {}", config.name))?;

        info!(
            chain = %config.name,
            chain_id = config.chain_id,
            rpc_endpoints = urls.len(),
            websocket = config.ws_url.is_some(),
            signer = %signer_address,
            "Chain endpoint initialized"
        );

        Ok(Self {
            chain: ChainInfo::new(config.name.clone(), config.chain_id),
            read_providers,
            write_url,
            ws_url: config.ws_url.clone(),
            wallet: EthereumWallet::from(signer),
            signer_address,
            max_block_range: config.max_block_range,
            poll_interval: relay.poll_interval,
            submit_timeout: relay.submit_timeout,
            confirm_timeout: relay.confirm_timeout,
            confirm_poll_interval: relay.confirm_poll_interval,
        })
    }

    pub fn chain(&self) -> &ChainInfo {
        &self.chain
    }

    pub fn signer_address(&self) -> Address {
        self.signer_address
    }

    /// Primary read provider, for `sol!` contract getters
    pub fn provider(&self) -> &RootProvider<Http<Client>> {
        &self.read_providers[0]
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn current_height(&self) -> Result<u64, RelayError> {
        let chain = self.chain.name.as_str();
        with_fallback(chain, &self.read_providers, |provider| async move {
            provider
                .get_block_number()
                .await
                .map_err(|e| RelayError::EndpointUnavailable {
                    chain: chain.to_string(),
                    message: e.to_string(),
                })
        })
        .await
    }

    /// Chain id reported by the RPC
    pub async fn chain_id(&self) -> Result<u64, RelayError> {
        let chain = self.chain.name.as_str();
        with_fallback(chain, &self.read_providers, |provider| async move {
            provider
                .get_chain_id()
                .await
                .map_err(|e| RelayError::EndpointUnavailable {
                    chain: chain.to_string(),
                    message: e.to_string(),
                })
        })
        .await
    }

    /// Deployed bytecode at `address`; empty when nothing is deployed
    pub async fn code_at(&self, address: Address) -> Result<Bytes, RelayError> {
        let chain = self.chain.name.as_str();
        with_fallback(chain, &self.read_providers, |provider| async move {
            provider
                .get_code_at(address)
                .await
                .map_err(|e| RelayError::EndpointUnavailable {
                    chain: chain.to_string(),
                    message: e.to_string(),
                })
        })
        .await
    }

    /// All logs of `event` emitted by `address` in `[from, to]`, ordered by
    /// (block, log index). See [`fetch_chunked`].
    pub async fn query_logs(
        &self,
        address: Address,
        event: B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, RelayError> {
        fetch_chunked(&self.chain.name, from, to, self.max_block_range, |lo, hi| {
            self.get_logs_once(address, event, lo, hi)
        })
        .await
    }

    async fn get_logs_once(
        &self,
        address: Address,
        event: B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<Log>, RelayError> {
        let chain = self.chain.name.as_str();
        let filter = Filter::new()
            .address(address)
            .event_signature(event)
            .from_block(from)
            .to_block(to);
        let filter = &filter;

        with_fallback(chain, &self.read_providers, |provider| async move {
            provider
                .get_logs(filter)
                .await
                .map_err(|e| RelayError::from_read(chain, from, to, e))
        })
        .await
    }

    /// Receipt of `tx_hash`, or `None` while it is still pending
    pub async fn receipt(&self, tx_hash: TxHash) -> Result<Option<TransferReceipt>, RelayError> {
        let chain = self.chain.name.as_str();
        let receipt = with_fallback(chain, &self.read_providers, |provider| async move {
            provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| RelayError::EndpointUnavailable {
                    chain: chain.to_string(),
                    message: e.to_string(),
                })
        })
        .await?;

        match receipt {
            Some(receipt) if !receipt.status() => Err(RelayError::SubmissionRejected {
                chain: chain.to_string(),
                reason: format!("transaction {} reverted", tx_hash),
            }),
            Some(receipt) => Ok(Some(TransferReceipt {
                tx_hash,
                block_number: receipt.block_number,
            })),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Infinite stream of new `event` logs from `address`.
    ///
    /// Uses `eth_subscribe` when a WebSocket URL is configured, otherwise polls
    /// for new blocks every `poll_interval`. The WebSocket stream ends when
    /// the connection drops; the polling stream never ends on its own.
    pub async fn subscribe(
        &self,
        address: Address,
        event: B256,
    ) -> Result<BoxStream<'static, Log>, RelayError> {
        match &self.ws_url {
            Some(ws_url) => self.subscribe_ws(ws_url, address, event).await,
            None => self.subscribe_polling(address, event).await,
        }
    }

    async fn subscribe_ws(
        &self,
        ws_url: &str,
        address: Address,
        event: B256,
    ) -> Result<BoxStream<'static, Log>, RelayError> {
        let unavailable = |e: &dyn std::fmt::Display| RelayError::EndpointUnavailable {
            chain: self.chain.name.clone(),
            message: e.to_string(),
        };

        let provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(ws_url))
            .await
            .map_err(|e| unavailable(&e))?;
        let filter = Filter::new().address(address).event_signature(event);
        let subscription = provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| unavailable(&e))?;

        debug!(chain = %self.chain.name, "WebSocket log subscription established");

        // The provider owns the socket; keep it alive alongside the stream.
        let logs = Box::pin(subscription.into_stream());
        Ok(stream::unfold((provider, logs), |(provider, mut logs)| async move {
            logs.next().await.map(|log| (log, (provider, logs)))
        })
        .boxed())
    }

    async fn subscribe_polling(
        &self,
        address: Address,
        event: B256,
    ) -> Result<BoxStream<'static, Log>, RelayError> {
        let start = self.current_height().await?;
        debug!(chain = %self.chain.name, from_block = start + 1, "Polling log subscription started");

        let heights = self.clone();
        let logs = self.clone();
        Ok(poll_logs(
            self.chain.name.clone(),
            start + 1,
            self.poll_interval,
            move || {
                let endpoint = heights.clone();
                async move { endpoint.current_height().await }
            },
            move |from, to| {
                let endpoint = logs.clone();
                async move { endpoint.query_logs(address, event, from, to).await }
            },
        ))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Sign and broadcast `tx` from this chain's key.
    ///
    /// Nonce, gas and chain id are filled by the provider. Bounded by the
    /// submit timeout.
    pub async fn submit(&self, tx: TransactionRequest) -> Result<TxHash, RelayError> {
        let chain = self.chain.name.as_str();
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(self.wallet.clone())
            .on_http(self.write_url.clone());

        let send = async {
            provider
                .send_transaction(tx)
                .await
                .map(|pending| *pending.tx_hash())
                .map_err(|e| RelayError::from_submit(chain, e))
        };

        match timeout(self.submit_timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::ConfirmationTimeout {
                chain: chain.to_string(),
                tx_hash: None,
                waited: self.submit_timeout,
            }),
        }
    }

    /// Poll until `tx_hash` is included, bounded by the confirm timeout.
    pub async fn confirm(&self, tx_hash: TxHash) -> Result<TransferReceipt, RelayError> {
        let poll = async {
            let mut ticker = interval(self.confirm_poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match self.receipt(tx_hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => {}
                    Err(e @ RelayError::SubmissionRejected { .. }) => return Err(e),
                    Err(e) => {
                        debug!(chain = %self.chain.name, tx_hash = %tx_hash, error = %e, "Receipt poll failed");
                    }
                }
            }
        };

        match timeout(self.confirm_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::ConfirmationTimeout {
                chain: self.chain.name.clone(),
                tx_hash: Some(tx_hash),
                waited: self.confirm_timeout,
            }),
        }
    }
}

/// Split `[from, to]` into consecutive inclusive chunks of at most
/// `max_range` blocks.
pub fn plan_chunks(from: u64, to: u64, max_range: u64) -> Vec<(u64, u64)> {
    let max_range = max_range.max(1);
    let mut chunks = Vec::new();
    let mut lo = from;

    while lo <= to {
        let hi = lo.saturating_add(max_range - 1).min(to);
        chunks.push((lo, hi));
        if hi == u64::MAX {
            break;
        }
        lo = hi + 1;
    }

    chunks
}

/// Halve a range of at least two blocks.
pub fn bisect(from: u64, to: u64) -> ((u64, u64), (u64, u64)) {
    let mid = from + (to - from) / 2;
    ((from, mid), (mid + 1, to))
}

/// Run `get_logs` over `[from, to]` in chunks of at most `max_range` blocks
/// and return every log ordered by (block, log index).
///
/// A chunk refused with [`RelayError::RangeTooLarge`] is bisected and both
/// halves are queried in its place; a refused single block is returned as
/// the error. Any other error aborts the whole query.
pub async fn fetch_chunked<F, Fut>(
    chain: &str,
    from: u64,
    to: u64,
    max_range: u64,
    mut get_logs: F,
) -> Result<Vec<Log>, RelayError>
where
    F: FnMut(u64, u64) -> Fut,
    Fut: Future<Output = Result<Vec<Log>, RelayError>>,
{
    let mut pending: VecDeque<(u64, u64)> = plan_chunks(from, to, max_range).into();
    let mut logs = Vec::new();

    while let Some((lo, hi)) = pending.pop_front() {
        match get_logs(lo, hi).await {
            Ok(mut batch) => logs.append(&mut batch),
            Err(RelayError::RangeTooLarge { .. }) if hi > lo => {
                debug!(chain, from = lo, to = hi, "Log query range refused, bisecting");
                let (first, second) = bisect(lo, hi);
                pending.push_front(second);
                pending.push_front(first);
            }
            Err(e) => return Err(e),
        }
    }

    sort_logs(&mut logs);
    Ok(logs)
}

/// Stream of logs from `next_block` onwards, polled every `poll_interval`.
///
/// Each tick reads the head with `height` and fetches `[next_block, head]`
/// with `get_logs`. The cursor only advances after a successful fetch, so a
/// failed read is retried on the next tick. The stream never ends.
pub fn poll_logs<H, HF, G, GF>(
    chain: String,
    next_block: u64,
    poll_interval: Duration,
    height: H,
    get_logs: G,
) -> BoxStream<'static, Log>
where
    H: Fn() -> HF + Send + 'static,
    HF: Future<Output = Result<u64, RelayError>> + Send,
    G: Fn(u64, u64) -> GF + Send + 'static,
    GF: Future<Output = Result<Vec<Log>, RelayError>> + Send,
{
    let mut ticker = interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let state = (chain, height, get_logs, next_block, ticker);
    stream::unfold(
        state,
        |(chain, height, get_logs, mut next_block, mut ticker)| async move {
            loop {
                ticker.tick().await;

                let head = match height().await {
                    Ok(head) => head,
                    Err(e) => {
                        warn!(chain = %chain, error = %e, "Polling height failed");
                        continue;
                    }
                };
                if head < next_block {
                    continue;
                }

                match get_logs(next_block, head).await {
                    Ok(logs) => {
                        next_block = head + 1;
                        if !logs.is_empty() {
                            let state = (chain, height, get_logs, next_block, ticker);
                            return Some((stream::iter(logs), state));
                        }
                    }
                    Err(e) => {
                        warn!(
                            chain = %chain,
                            from = next_block,
                            to = head,
                            error = %e,
                            "Polling logs failed"
                        );
                    }
                }
            }
        },
    )
    .flatten()
    .boxed()
}

fn sort_logs(logs: &mut [Log]) {
    logs.sort_by_key(|log| {
        (
            log.block_number.unwrap_or_default(),
            log.log_index.unwrap_or_default(),
        )
    });
}
