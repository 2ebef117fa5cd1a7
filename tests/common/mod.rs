//! In-memory pool used by the relay integration tests
//!
//! `MockPool` behaves like a deployed pool on a chain whose height only
//! moves when a test says so. A successful transfer-out is recorded as a
//! `CrossChainTransferOut` at the current height, the way the contract would
//! emit it.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{BoxStream, StreamExt};
use tokio::time::Instant;

use pool_relayer::bounded_cache::BoundedHashCache;
use pool_relayer::metrics::Metrics;
use pool_relayer::relay::RelayDirection;
use pool_relayer::types::{
    ChainInfo, SubmittedTransfer, TransferInEvent, TransferOutEvent, TransferOutRequest,
    TransferReceipt,
};
use pool_relayer::writers::{SubmissionQueue, SubmissionWorker};
use pool_relayer::{PoolProxy, RelayError};

pub const CHAIN_A_ID: u64 = 534351;
pub const CHAIN_B_ID: u64 = 11155111;

/// One recorded `submit_transfer_out` call
#[derive(Debug, Clone)]
pub struct Submission {
    pub request: TransferOutRequest,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    height: u64,
    transfer_ins: Vec<TransferInEvent>,
    transfer_outs: Vec<TransferOutEvent>,
    submissions: Vec<Submission>,
    /// Submissions for these hashes are rejected
    reject: HashSet<B256>,
    /// Confirmations for these hashes time out
    stall: HashSet<B256>,
    /// Number of upcoming height reads that fail
    height_failures: u32,
    /// Number of upcoming subscribe calls that fail
    subscribe_failures: u32,
    /// When set, confirmed payouts are not visible to queries
    hide_payouts: bool,
    in_flight: usize,
    max_in_flight: usize,
    transfer_out_queries: usize,
    subscriptions: usize,
    live: Vec<UnboundedSender<TransferInEvent>>,
    tx_counter: u64,
}

pub struct MockPool {
    chain: ChainInfo,
    confirm_latency: Duration,
    state: Mutex<MockState>,
}

impl MockPool {
    pub fn new(name: &str, chain_id: u64) -> Arc<Self> {
        Self::with_latency(name, chain_id, Duration::from_secs(1))
    }

    pub fn with_latency(name: &str, chain_id: u64, confirm_latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            chain: ChainInfo::new(name, chain_id),
            confirm_latency,
            state: Mutex::new(MockState {
                height: 100,
                ..MockState::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_height(&self, height: u64) {
        self.state().height = height;
    }

    /// Record a past deposit without notifying live subscribers.
    pub fn add_transfer_in(&self, event: TransferInEvent) {
        self.state().transfer_ins.push(event);
    }

    /// Record a deposit and deliver it to every live subscriber.
    pub fn emit_transfer_in(&self, event: TransferInEvent) {
        let mut state = self.state();
        state.transfer_ins.push(event.clone());
        state
            .live
            .retain(|sender| sender.unbounded_send(event.clone()).is_ok());
    }

    pub fn add_transfer_out(&self, event: TransferOutEvent) {
        self.state().transfer_outs.push(event);
    }

    /// End every open live subscription.
    pub fn close_subscriptions(&self) {
        self.state().live.clear();
    }

    pub fn reject(&self, origin_tx_hash: B256) {
        self.state().reject.insert(origin_tx_hash);
    }

    pub fn stall(&self, origin_tx_hash: B256) {
        self.state().stall.insert(origin_tx_hash);
    }

    pub fn fail_height_reads(&self, count: u32) {
        self.state().height_failures = count;
    }

    pub fn fail_subscriptions(&self, count: u32) {
        self.state().subscribe_failures = count;
    }

    pub fn hide_payouts(&self) {
        self.state().hide_payouts = true;
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    pub fn submitted_hashes(&self) -> Vec<B256> {
        self.state()
            .submissions
            .iter()
            .map(|s| s.request.origin_tx_hash)
            .collect()
    }

    pub fn transfer_outs(&self) -> Vec<TransferOutEvent> {
        self.state().transfer_outs.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn transfer_out_queries(&self) -> usize {
        self.state().transfer_out_queries
    }

    pub fn subscriptions(&self) -> usize {
        self.state().subscriptions
    }
}

#[async_trait]
impl PoolProxy for MockPool {
    fn chain(&self) -> &ChainInfo {
        &self.chain
    }

    async fn current_height(&self) -> Result<u64, RelayError> {
        let mut state = self.state();
        if state.height_failures > 0 {
            state.height_failures -= 1;
            return Err(RelayError::EndpointUnavailable {
                chain: self.chain.name.clone(),
                message: "connection refused".to_string(),
            });
        }
        Ok(state.height)
    }

    async fn query_transfer_ins(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransferInEvent>, RelayError> {
        let state = self.state();
        let mut events: Vec<_> = state
            .transfer_ins
            .iter()
            .filter(|e| (from..=to).contains(&e.block_height))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_height, e.log_index));
        Ok(events)
    }

    async fn query_transfer_outs(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransferOutEvent>, RelayError> {
        let mut state = self.state();
        state.transfer_out_queries += 1;
        Ok(state
            .transfer_outs
            .iter()
            .filter(|e| (from..=to).contains(&e.block_height))
            .cloned()
            .collect())
    }

    async fn subscribe_transfer_ins(
        &self,
    ) -> Result<BoxStream<'static, TransferInEvent>, RelayError> {
        let mut state = self.state();
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(RelayError::EndpointUnavailable {
                chain: self.chain.name.clone(),
                message: "websocket handshake failed".to_string(),
            });
        }
        let (sender, receiver) = unbounded();
        state.live.push(sender);
        state.subscriptions += 1;
        Ok(receiver.boxed())
    }

    async fn submit_transfer_out(
        &self,
        request: &TransferOutRequest,
    ) -> Result<SubmittedTransfer, RelayError> {
        let mut state = self.state();
        state.submissions.push(Submission {
            request: request.clone(),
            at: Instant::now(),
        });

        if state.reject.contains(&request.origin_tx_hash) {
            return Err(RelayError::SubmissionRejected {
                chain: self.chain.name.clone(),
                reason: "execution reverted".to_string(),
            });
        }

        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        state.tx_counter += 1;

        Ok(SubmittedTransfer {
            tx_hash: B256::from(U256::from(state.tx_counter)),
            origin_tx_hash: request.origin_tx_hash,
        })
    }

    async fn confirm(&self, submitted: &SubmittedTransfer) -> Result<TransferReceipt, RelayError> {
        let stalled = self.state().stall.contains(&submitted.origin_tx_hash);
        let wait = if stalled {
            Duration::from_secs(180)
        } else {
            self.confirm_latency
        };
        tokio::time::sleep(wait).await;

        let mut state = self.state();
        state.in_flight -= 1;

        if stalled {
            return Err(RelayError::ConfirmationTimeout {
                chain: self.chain.name.clone(),
                tx_hash: Some(submitted.tx_hash),
                waited: wait,
            });
        }

        let block = state.height;
        if !state.hide_payouts {
            let request = state
                .submissions
                .iter()
                .rev()
                .find(|s| s.request.origin_tx_hash == submitted.origin_tx_hash)
                .map(|s| s.request.clone());
            if let Some(request) = request {
                state.transfer_outs.push(TransferOutEvent {
                    origin_tx_hash: request.origin_tx_hash,
                    origin_chain_id: request.origin_chain_id,
                    token_address: request.token_address,
                    wallet_address: request.wallet_address,
                    amount: request.amount,
                    block_height: block,
                    tx_hash: submitted.tx_hash,
                });
            }
        }

        Ok(TransferReceipt {
            tx_hash: submitted.tx_hash,
            block_number: Some(block),
        })
    }
}

/// Deposit of `amount` native units by a fixed wallet
pub fn transfer_in(byte: u8, block: u64, origin_chain_id: u64) -> TransferInEvent {
    TransferInEvent {
        origin_chain_id: U256::from(origin_chain_id),
        wallet_address: Address::repeat_byte(0x11),
        token_address: Address::ZERO,
        amount: U256::from(1_000_000_000_000_000u64),
        fees: U256::from(3_000_000_000_000u64),
        origin_tx_hash: B256::repeat_byte(byte),
        block_height: block,
        log_index: 0,
    }
}

/// Payout matching `transfer_in(byte, ..)`
pub fn transfer_out(byte: u8, block: u64, origin_chain_id: u64) -> TransferOutEvent {
    let event = transfer_in(byte, 0, origin_chain_id);
    TransferOutEvent {
        origin_tx_hash: event.origin_tx_hash,
        origin_chain_id: event.origin_chain_id,
        token_address: event.token_address,
        wallet_address: event.wallet_address,
        amount: event.amount,
        block_height: block,
        tx_hash: B256::repeat_byte(0xee),
    }
}

/// A direction with a running submission worker
pub struct Lane {
    pub direction: RelayDirection,
    pub queue: SubmissionQueue,
    pub metrics: Arc<Metrics>,
}

pub fn spawn_lane(source: &Arc<MockPool>, destination: &Arc<MockPool>) -> Lane {
    let source_pool: Arc<dyn PoolProxy> = source.clone();
    let destination_pool: Arc<dyn PoolProxy> = destination.clone();
    let direction = RelayDirection::new(source_pool, destination_pool, true);
    let metrics = Arc::new(Metrics::new().unwrap());

    let (queue, receiver) = SubmissionQueue::new(destination.chain().name.clone(), 16);
    let worker = SubmissionWorker::new(
        &direction,
        receiver,
        BoundedHashCache::new(1000, 3600),
        Arc::clone(&metrics),
    );
    tokio::spawn(worker.run());

    Lane {
        direction,
        queue,
        metrics,
    }
}

/// Let spawned tasks run until they block on time or I/O.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
