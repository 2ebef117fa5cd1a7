//! Pool Contract Proxy
//!
//! Typed access to one chain's pool contract: decoded transfer events, the
//! `crossChainTransferOut` write, and the read-only getters. The relay core
//! only talks to pools through [`PoolProxy`], so it runs unchanged against
//! in-memory chains in tests.

use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::{Log, TransactionRequest};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::contracts::CrossChainPool;
use crate::endpoint::ChainEndpoint;
use crate::error::RelayError;
use crate::types::{
    ChainInfo, RelayEvent, SubmittedTransfer, TransferInEvent, TransferOutEvent,
    TransferOutRequest, TransferReceipt,
};

/// Operations the relay core needs from one chain's pool
#[async_trait]
pub trait PoolProxy: Send + Sync {
    fn chain(&self) -> &ChainInfo;

    async fn current_height(&self) -> Result<u64, RelayError>;

    /// Transfer-ins emitted in `[from, to]`, ordered by (block, log index)
    async fn query_transfer_ins(&self, from: u64, to: u64)
        -> Result<Vec<TransferInEvent>, RelayError>;

    /// Transfer-outs emitted in `[from, to]`
    async fn query_transfer_outs(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransferOutEvent>, RelayError>;

    /// New transfer-ins as they are emitted. The stream may end when the
    /// underlying connection drops.
    async fn subscribe_transfer_ins(
        &self,
    ) -> Result<BoxStream<'static, TransferInEvent>, RelayError>;

    /// Broadcast `crossChainTransferOut` with the request's five arguments.
    async fn submit_transfer_out(
        &self,
        request: &TransferOutRequest,
    ) -> Result<SubmittedTransfer, RelayError>;

    /// Wait for a submitted transfer-out to be included.
    async fn confirm(&self, submitted: &SubmittedTransfer) -> Result<TransferReceipt, RelayError>;
}

/// Read-only pool configuration, reported at startup
#[derive(Debug, Clone, Serialize)]
pub struct PoolParameters {
    pub owner: Address,
    /// Basis points of 10000
    pub fees_percentage: U256,
    pub gas_price: U256,
    pub ratio: U256,
}

/// Deposit size quoted by [`PoolContract::log_parameters`]: one whole unit
/// of the native currency
pub const FEE_QUOTE_AMOUNT: u128 = 1_000_000_000_000_000_000;

/// [`PoolProxy`] backed by a deployed pool contract
#[derive(Clone)]
pub struct PoolContract {
    endpoint: ChainEndpoint,
    address: Address,
}

impl PoolContract {
    pub fn new(endpoint: ChainEndpoint, address: Address) -> Self {
        Self { endpoint, address }
    }

    /// Fail unless the RPC serves the expected chain and the pool has code.
    pub async fn verify_deployment(&self) -> Result<()> {
        let expected = self.endpoint.chain().chain_id;
        let actual = self.endpoint.chain_id().await?;
        if actual != expected {
            return Err(eyre!(
                "RPC for {} reports chain id {}, expected {}",
                self.endpoint.chain().name,
                actual,
                expected
            ));
        }

        let code = self.endpoint.code_at(self.address).await?;
        if code.is_empty() {
            return Err(eyre!(
                "No contract code at pool address {} on {}",
                self.address,
                self.endpoint.chain()
            ));
        }

        Ok(())
    }

    pub async fn pool_parameters(&self) -> Result<PoolParameters> {
        let pool = CrossChainPool::new(self.address, self.endpoint.provider());

        let owner = pool.owner().call().await.wrap_err("Failed to read owner")?;
        let fees = pool
            .feesPercentage()
            .call()
            .await
            .wrap_err("Failed to read feesPercentage")?;
        let gas_price = pool
            .gasPrice()
            .call()
            .await
            .wrap_err("Failed to read gasPrice")?;
        let ratio = pool.ratio().call().await.wrap_err("Failed to read ratio")?;

        Ok(PoolParameters {
            owner: owner._0,
            fees_percentage: fees._0,
            gas_price: gas_price._0,
            ratio: ratio._0,
        })
    }

    /// Fee the pool charges for depositing `amount` of `token`
    pub async fn get_fees(&self, token: Address, amount: U256) -> Result<U256> {
        let pool = CrossChainPool::new(self.address, self.endpoint.provider());
        let fees = pool
            .getFees(token, amount)
            .call()
            .await
            .wrap_err("Failed to read getFees")?;
        Ok(fees._0)
    }

    /// Log startup information about this pool
    pub async fn log_parameters(&self) -> Result<()> {
        let params = self.pool_parameters().await?;
        let native_fee = match self
            .get_fees(Address::ZERO, U256::from(FEE_QUOTE_AMOUNT))
            .await
        {
            Ok(fee) => Some(fee),
            Err(e) => {
                warn!(
                    chain = %self.endpoint.chain(),
                    error = %e,
                    "Could not quote native deposit fee"
                );
                None
            }
        };
        info!(
            chain = %self.endpoint.chain(),
            pool = %self.address,
            owner = %params.owner,
            fees_bps = %params.fees_percentage,
            gas_price = %params.gas_price,
            ratio = %params.ratio,
            native_fee = ?native_fee,
            relayer = %self.endpoint.signer_address(),
            "Pool parameters"
        );
        Ok(())
    }

    async fn query_events(
        &self,
        signature: alloy::primitives::B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<RelayEvent>, RelayError> {
        let logs = self
            .endpoint
            .query_logs(self.address, signature, from, to)
            .await?;
        Ok(logs.iter().filter_map(decode_log).collect())
    }
}

#[async_trait]
impl PoolProxy for PoolContract {
    fn chain(&self) -> &ChainInfo {
        self.endpoint.chain()
    }

    async fn current_height(&self) -> Result<u64, RelayError> {
        self.endpoint.current_height().await
    }

    async fn query_transfer_ins(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransferInEvent>, RelayError> {
        let events = self
            .query_events(CrossChainPool::CrossChainTransferIn::SIGNATURE_HASH, from, to)
            .await?;
        Ok(events
            .into_iter()
            .filter_map(|event| match event {
                RelayEvent::TransferIn(e) => Some(e),
                RelayEvent::TransferOut(_) => None,
            })
            .collect())
    }

    async fn query_transfer_outs(
        &self,
        from: u64,
        to: u64,
    ) -> Result<Vec<TransferOutEvent>, RelayError> {
        let events = self
            .query_events(CrossChainPool::CrossChainTransferOut::SIGNATURE_HASH, from, to)
            .await?;
        Ok(events
            .into_iter()
            .filter_map(|event| match event {
                RelayEvent::TransferOut(e) => Some(e),
                RelayEvent::TransferIn(_) => None,
            })
            .collect())
    }

    async fn subscribe_transfer_ins(
        &self,
    ) -> Result<BoxStream<'static, TransferInEvent>, RelayError> {
        let logs = self
            .endpoint
            .subscribe(
                self.address,
                CrossChainPool::CrossChainTransferIn::SIGNATURE_HASH,
            )
            .await?;

        Ok(logs
            .filter_map(|log| async move {
                match decode_log(&log) {
                    Some(RelayEvent::TransferIn(event)) => Some(event),
                    _ => None,
                }
            })
            .boxed())
    }

    async fn submit_transfer_out(
        &self,
        request: &TransferOutRequest,
    ) -> Result<SubmittedTransfer, RelayError> {
        let tx = TransactionRequest::default()
            .to(self.address)
            .input(encode_transfer_out(request).into());
        let tx_hash = self.endpoint.submit(tx).await?;

        Ok(SubmittedTransfer {
            tx_hash,
            origin_tx_hash: request.origin_tx_hash,
        })
    }

    async fn confirm(&self, submitted: &SubmittedTransfer) -> Result<TransferReceipt, RelayError> {
        self.endpoint.confirm(submitted.tx_hash).await
    }
}

/// Calldata for `crossChainTransferOut(bytes32,uint256,address,address,uint256)`
pub fn encode_transfer_out(request: &TransferOutRequest) -> Bytes {
    CrossChainPool::crossChainTransferOutCall {
        originTxHash: request.origin_tx_hash,
        originChainId: request.origin_chain_id,
        tokenAddress: request.token_address,
        walletAddress: request.wallet_address,
        amount: request.amount,
    }
    .abi_encode()
    .into()
}

/// Decode a pool log, skipping (with a warning) logs that do not parse.
pub fn decode_log(log: &Log) -> Option<RelayEvent> {
    match try_decode_log(log) {
        Ok(event) => event,
        Err(e) => {
            warn!(
                block = ?log.block_number,
                tx = ?log.transaction_hash,
                data_len = log.data().data.len(),
                error = %e,
                "Skipping undecodable pool log"
            );
            None
        }
    }
}

/// Decode a pool log. `Ok(None)` for logs of other events.
pub fn try_decode_log(log: &Log) -> Result<Option<RelayEvent>, RelayError> {
    let topic0 = log.topic0().copied().unwrap_or_default();

    if topic0 == CrossChainPool::CrossChainTransferIn::SIGNATURE_HASH {
        let decoded = CrossChainPool::CrossChainTransferIn::decode_log(&log.inner, true)
            .map_err(|e| RelayError::Decode {
                event: "CrossChainTransferIn",
                message: e.to_string(),
            })?;
        let origin_tx_hash = log.transaction_hash.ok_or(RelayError::Decode {
            event: "CrossChainTransferIn",
            message: "missing transaction hash".to_string(),
        })?;

        let event = decoded.data;
        return Ok(Some(RelayEvent::TransferIn(TransferInEvent {
            origin_chain_id: event.chainId,
            wallet_address: event.walletAddress,
            token_address: event.tokenAddress,
            amount: event.amount,
            fees: event.fees,
            origin_tx_hash,
            block_height: log.block_number.unwrap_or_default(),
            log_index: log.log_index.unwrap_or_default(),
        })));
    }

    if topic0 == CrossChainPool::CrossChainTransferOut::SIGNATURE_HASH {
        let decoded = CrossChainPool::CrossChainTransferOut::decode_log(&log.inner, true)
            .map_err(|e| RelayError::Decode {
                event: "CrossChainTransferOut",
                message: e.to_string(),
            })?;

        let event = decoded.data;
        return Ok(Some(RelayEvent::TransferOut(TransferOutEvent {
            origin_tx_hash: event.originTxHash,
            origin_chain_id: event.originChainId,
            token_address: event.tokenAddress,
            wallet_address: event.walletAddress,
            amount: event.amount,
            block_height: log.block_number.unwrap_or_default(),
            tx_hash: log.transaction_hash.unwrap_or_default(),
        })));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{LogData, B256};

    fn rpc_log(data: LogData, tx_hash: Option<B256>) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xc8),
                data,
            },
            block_number: Some(1234),
            transaction_hash: tx_hash,
            log_index: Some(3),
            ..Default::default()
        }
    }

    fn transfer_in() -> CrossChainPool::CrossChainTransferIn {
        CrossChainPool::CrossChainTransferIn {
            chainId: U256::from(534351u64),
            walletAddress: Address::repeat_byte(0x11),
            tokenAddress: Address::ZERO,
            amount: U256::from(10u64).pow(U256::from(15u64)),
            fees: U256::from(3u64),
        }
    }

    #[test]
    fn test_decode_transfer_in() {
        let log = rpc_log(transfer_in().encode_log_data(), Some(B256::repeat_byte(0xaa)));

        match try_decode_log(&log).unwrap() {
            Some(RelayEvent::TransferIn(event)) => {
                assert_eq!(event.origin_tx_hash, B256::repeat_byte(0xaa));
                assert_eq!(event.origin_chain_id, U256::from(534351u64));
                assert_eq!(event.wallet_address, Address::repeat_byte(0x11));
                assert!(event.is_native());
                assert_eq!(event.fees, U256::from(3u64));
                assert_eq!(event.block_height, 1234);
                assert_eq!(event.log_index, 3);
            }
            other => panic!("expected transfer-in, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_transfer_out() {
        let payout = CrossChainPool::CrossChainTransferOut {
            originTxHash: B256::repeat_byte(0xaa),
            originChainId: U256::from(534351u64),
            tokenAddress: Address::ZERO,
            walletAddress: Address::repeat_byte(0x11),
            amount: U256::from(1000u64),
        };
        let log = rpc_log(payout.encode_log_data(), Some(B256::repeat_byte(0xbb)));

        match try_decode_log(&log).unwrap() {
            Some(RelayEvent::TransferOut(event)) => {
                assert_eq!(event.origin_tx_hash, B256::repeat_byte(0xaa));
                assert_eq!(event.tx_hash, B256::repeat_byte(0xbb));
                assert_eq!(event.amount, U256::from(1000u64));
            }
            other => panic!("expected transfer-out, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unrelated_log() {
        let data = LogData::new_unchecked(vec![B256::repeat_byte(0x01)], Bytes::new());
        let log = rpc_log(data, Some(B256::repeat_byte(0xaa)));
        assert!(try_decode_log(&log).unwrap().is_none());
    }

    #[test]
    fn test_decode_truncated_log_is_skipped() {
        let data = LogData::new_unchecked(
            vec![CrossChainPool::CrossChainTransferIn::SIGNATURE_HASH],
            Bytes::from(vec![0u8; 40]),
        );
        let log = rpc_log(data, Some(B256::repeat_byte(0xaa)));

        assert!(matches!(
            try_decode_log(&log),
            Err(RelayError::Decode { event: "CrossChainTransferIn", .. })
        ));
        assert!(decode_log(&log).is_none());
    }

    #[test]
    fn test_transfer_in_without_tx_hash_is_rejected() {
        let log = rpc_log(transfer_in().encode_log_data(), None);
        assert!(try_decode_log(&log).is_err());
    }

    #[test]
    fn test_encode_transfer_out_argument_order() {
        let request = TransferOutRequest {
            origin_tx_hash: B256::repeat_byte(0xaa),
            origin_chain_id: U256::from(534351u64),
            token_address: Address::ZERO,
            wallet_address: Address::repeat_byte(0x11),
            amount: U256::from(1000u64),
        };
        let calldata = encode_transfer_out(&request);

        assert_eq!(
            &calldata[..4],
            CrossChainPool::crossChainTransferOutCall::SELECTOR.as_slice()
        );
        // 4-byte selector followed by five 32-byte words
        assert_eq!(calldata.len(), 4 + 5 * 32);

        let decoded =
            CrossChainPool::crossChainTransferOutCall::abi_decode(&calldata, true).unwrap();
        assert_eq!(decoded.originTxHash, request.origin_tx_hash);
        assert_eq!(decoded.originChainId, request.origin_chain_id);
        assert_eq!(decoded.tokenAddress, request.token_address);
        assert_eq!(decoded.walletAddress, request.wallet_address);
        assert_eq!(decoded.amount, request.amount);
    }

    #[test]
    fn test_native_fee_quote_calldata() {
        let call = CrossChainPool::getFeesCall {
            tokenAddress: Address::ZERO,
            amount: U256::from(FEE_QUOTE_AMOUNT),
        };
        let calldata = call.abi_encode();

        assert_eq!(&calldata[..4], CrossChainPool::getFeesCall::SELECTOR.as_slice());
        // Token word is all zeros, amount word is 1e18
        assert!(calldata[4..36].iter().all(|b| *b == 0));
        assert_eq!(
            U256::from_be_slice(&calldata[36..68]),
            U256::from(10u64).pow(U256::from(18u64))
        );
    }
}
