//! Multi-endpoint reads
//!
//! Each chain may list several HTTP RPC URLs. Reads go to the first one and
//! fall through to the next on transient failures; writes always use the
//! primary.

use std::future::Future;

use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::transports::http::{Client, Http};
use eyre::{Result, WrapErr};
use tracing::{debug, warn};

use crate::error::RelayError;

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Create alloy HTTP providers for each RPC URL, primary first.
pub fn create_providers(urls: &[String]) -> Result<Vec<RootProvider<Http<Client>>>> {
    if urls.is_empty() {
        return Err(eyre::eyre!("At least one RPC URL is required"));
    }
    urls.iter()
        .map(|url| {
            let parsed = url
                .parse()
                .wrap_err_with(|| format!("Invalid RPC URL: {}", url))?;
            Ok(ProviderBuilder::new().on_http(parsed))
        })
        .collect()
}

/// Run `call` against each provider in order until one succeeds.
///
/// Non-transient errors (a rejected range, a decode failure) are returned
/// immediately since another endpoint would answer the same way.
pub async fn with_fallback<'a, P, T, F, Fut>(
    chain: &str,
    providers: &'a [P],
    mut call: F,
) -> Result<T, RelayError>
where
    F: FnMut(&'a P) -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let mut last_error = None;

    for (index, provider) in providers.iter().enumerate() {
        match call(provider).await {
            Ok(value) => {
                if index > 0 {
                    debug!(chain, rpc_index = index, "Read served by fallback RPC");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() => {
                warn!(chain, rpc_index = index, error = %e, "RPC read failed, trying next endpoint");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| RelayError::EndpointUnavailable {
        chain: chain.to_string(),
        message: "no RPC endpoints configured".to_string(),
    }))
}
