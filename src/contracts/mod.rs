//! Contract bindings

pub mod pool;

pub use pool::CrossChainPool;
