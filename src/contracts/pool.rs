//! Cross-chain pool contract ABI definition
//!
//! Uses alloy's sol! macro to generate type-safe bindings for the pool
//! contract deployed on each side of the relay.

use alloy::sol;

sol! {
    /// Cross-chain pool interface consumed by the relayer
    #[sol(rpc)]
    contract CrossChainPool {
        /// Pay out a deposit observed on the other chain.
        /// Reverts when `originTxHash` has already been paid out.
        ///
        /// # Arguments
        /// * `originTxHash` - Hash of the transaction that emitted CrossChainTransferIn
        /// * `originChainId` - Chain id carried by the transfer-in event
        /// * `tokenAddress` - Token to pay out (zero address for native currency)
        /// * `walletAddress` - Recipient
        /// * `amount` - Amount to pay out
        function crossChainTransferOut(
            bytes32 originTxHash,
            uint256 originChainId,
            address tokenAddress,
            address walletAddress,
            uint256 amount
        ) external;

        /// Owner of the pool
        function owner() external view returns (address);

        /// Fee rate in basis points (1/10000)
        function feesPercentage() external view returns (uint256);

        /// Gas price used when quoting fees
        function gasPrice() external view returns (uint256);

        /// Conversion ratio between the two chains
        function ratio() external view returns (uint256);

        /// Fee quote for a deposit of `amount` of `tokenAddress`
        function getFees(address tokenAddress, uint256 amount) external view returns (uint256);

        /// Events
        event CrossChainTransferIn(
            uint256 chainId,
            address walletAddress,
            address tokenAddress,
            uint256 amount,
            uint256 fees
        );

        event CrossChainTransferOut(
            bytes32 originTxHash,
            uint256 originChainId,
            address tokenAddress,
            address walletAddress,
            uint256 amount
        );
    }
}
