use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use eyre::{eyre, Result, WrapErr};
use url::Url;

use crate::redact::Redacted;
use crate::rpc_fallback::parse_rpc_urls;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    /// Primary chain. The A→B direction is flagged primary.
    pub chain_a: ChainConfig,
    pub chain_b: ChainConfig,
    pub relay: RelayConfig,
    /// Health/metrics server, disabled unless HEALTH_PORT is set
    pub server: Option<ServerConfig>,
}

/// One side of the relay
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub rpc_url: String,
    /// Additional RPC URLs for reads (tried in order when primary fails)
    pub rpc_fallback_urls: Vec<String>,
    /// WebSocket endpoint for live subscriptions. Polling is used when unset.
    pub ws_url: Option<String>,
    pub chain_id: u64,
    pub pool_address: Address,
    pub private_key: Redacted<String>,
    /// Trailing catch-up window in blocks
    pub window_blocks: u64,
    /// Blocks below the head ignored when scanning transfer-ins
    pub finality_blocks: u64,
    /// Maximum span of a single eth_getLogs call
    pub max_block_range: u64,
}

impl ChainConfig {
    /// All RPC URLs: primary followed by fallbacks.
    pub fn all_rpc_urls(&self) -> Vec<String> {
        let mut urls = vec![self.rpc_url.clone()];
        urls.extend(self.rpc_fallback_urls.iter().cloned());
        urls
    }
}

/// Relay engine tuning
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Minimum spacing between catch-up submissions
    pub item_delay: Duration,
    /// Time between catch-up passes; `None` runs a single pass at startup
    pub catchup_interval: Option<Duration>,
    /// Block polling interval for chains without a WebSocket endpoint
    pub poll_interval: Duration,
    pub submit_timeout: Duration,
    pub confirm_timeout: Duration,
    pub confirm_poll_interval: Duration,
    /// Resubscribe when the live stream has been silent this long
    pub live_idle_timeout: Option<Duration>,
    pub queue_capacity: usize,
    pub relayed_cache_size: usize,
    pub relayed_cache_ttl_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            item_delay: Duration::from_millis(default_item_delay_ms()),
            catchup_interval: Some(Duration::from_millis(default_catchup_interval_ms())),
            poll_interval: Duration::from_millis(default_poll_interval_ms()),
            submit_timeout: Duration::from_millis(default_submit_timeout_ms()),
            confirm_timeout: Duration::from_millis(default_confirm_timeout_ms()),
            confirm_poll_interval: Duration::from_millis(default_confirm_poll_ms()),
            live_idle_timeout: Some(Duration::from_millis(default_live_idle_timeout_ms())),
            queue_capacity: default_queue_capacity(),
            relayed_cache_size: default_relayed_cache_size(),
            relayed_cache_ttl_secs: default_relayed_cache_ttl_secs(),
        }
    }
}

/// Health server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

/// Default functions
fn default_window_blocks() -> u64 {
    1000
}

fn default_finality_blocks() -> u64 {
    0
}

fn default_max_block_range() -> u64 {
    10_000
}

fn default_item_delay_ms() -> u64 {
    15_000
}

fn default_catchup_interval_ms() -> u64 {
    300_000
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

fn default_submit_timeout_ms() -> u64 {
    60_000
}

fn default_confirm_timeout_ms() -> u64 {
    180_000
}

fn default_confirm_poll_ms() -> u64 {
    2_000
}

fn default_live_idle_timeout_ms() -> u64 {
    600_000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_relayed_cache_size() -> usize {
    100_000
}

fn default_relayed_cache_ttl_secs() -> u64 {
    86_400
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from the process environment
    pub fn load_from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup and validate it
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let shared_key = lookup("PRIVATE_KEY");

        let chain_a = load_chain(&lookup, "CHAIN_A", "chain-a", shared_key.as_deref())?;
        let chain_b = load_chain(&lookup, "CHAIN_B", "chain-b", shared_key.as_deref())?;

        let catchup_interval_ms: u64 =
            parse_or(&lookup, "CATCHUP_INTERVAL_MS", default_catchup_interval_ms())?;
        let live_idle_timeout_ms: u64 =
            parse_or(&lookup, "LIVE_IDLE_TIMEOUT_MS", default_live_idle_timeout_ms())?;

        let relay = RelayConfig {
            item_delay: Duration::from_millis(parse_or(
                &lookup,
                "ITEM_DELAY_MS",
                default_item_delay_ms(),
            )?),
            catchup_interval: non_zero_millis(catchup_interval_ms),
            poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "POLL_INTERVAL_MS",
                default_poll_interval_ms(),
            )?),
            submit_timeout: Duration::from_millis(parse_or(
                &lookup,
                "SUBMIT_TIMEOUT_MS",
                default_submit_timeout_ms(),
            )?),
            confirm_timeout: Duration::from_millis(parse_or(
                &lookup,
                "CONFIRM_TIMEOUT_MS",
                default_confirm_timeout_ms(),
            )?),
            confirm_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                "CONFIRM_POLL_MS",
                default_confirm_poll_ms(),
            )?),
            live_idle_timeout: non_zero_millis(live_idle_timeout_ms),
            queue_capacity: parse_or(&lookup, "QUEUE_CAPACITY", default_queue_capacity())?,
            relayed_cache_size: parse_or(
                &lookup,
                "RELAYED_CACHE_SIZE",
                default_relayed_cache_size(),
            )?,
            relayed_cache_ttl_secs: parse_or(
                &lookup,
                "RELAYED_CACHE_TTL_SECS",
                default_relayed_cache_ttl_secs(),
            )?,
        };

        let server = match lookup("HEALTH_PORT") {
            Some(port) => Some(ServerConfig {
                bind_address: lookup("HEALTH_BIND").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: port
                    .trim()
                    .parse()
                    .wrap_err("HEALTH_PORT must be a valid port")?,
            }),
            None => None,
        };

        let config = Config {
            chain_a,
            chain_b,
            relay,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the relayer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chain_a.chain_id == self.chain_b.chain_id {
            return Err(eyre!(
                "CHAIN_A_CHAIN_ID and CHAIN_B_CHAIN_ID must differ (both are {})",
                self.chain_a.chain_id
            ));
        }
        if self.relay.queue_capacity == 0 {
            return Err(eyre!("QUEUE_CAPACITY must be greater than 0"));
        }
        if self.relay.poll_interval.is_zero() {
            return Err(eyre!("POLL_INTERVAL_MS must be greater than 0"));
        }
        if self.relay.confirm_poll_interval.is_zero() {
            return Err(eyre!("CONFIRM_POLL_MS must be greater than 0"));
        }
        if self.relay.relayed_cache_size == 0 {
            return Err(eyre!("RELAYED_CACHE_SIZE must be greater than 0"));
        }

        for (prefix, chain) in [("CHAIN_A", &self.chain_a), ("CHAIN_B", &self.chain_b)] {
            if chain.window_blocks == 0 {
                return Err(eyre!("{}_WINDOW_BLOCKS must be greater than 0", prefix));
            }
            if chain.max_block_range == 0 {
                return Err(eyre!("{}_MAX_BLOCK_RANGE must be greater than 0", prefix));
            }
            for url in chain.all_rpc_urls() {
                let parsed = Url::parse(&url)
                    .wrap_err_with(|| format!("{}_RPC_URL contains an invalid URL", prefix))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(eyre!("{}_RPC_URL must use http or https", prefix));
                }
            }
            if let Some(ws_url) = &chain.ws_url {
                let parsed = Url::parse(ws_url)
                    .wrap_err_with(|| format!("{}_WS_URL is not a valid URL", prefix))?;
                if !matches!(parsed.scheme(), "ws" | "wss") {
                    return Err(eyre!("{}_WS_URL must use ws or wss", prefix));
                }
            }
            PrivateKeySigner::from_str(chain.private_key.expose())
                .map_err(|_| eyre!("{}_PRIVATE_KEY is not a valid private key", prefix))?;
        }

        Ok(())
    }
}

fn load_chain<F>(
    lookup: &F,
    prefix: &str,
    default_name: &str,
    shared_key: Option<&str>,
) -> Result<ChainConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let key = |suffix: &str| format!("{}_{}", prefix, suffix);

    let rpc_raw = required(lookup, &key("RPC_URL"))?;
    let rpc_urls = parse_rpc_urls(&rpc_raw);
    if rpc_urls.is_empty() {
        return Err(eyre!("{} cannot be empty", key("RPC_URL")));
    }

    let pool_address = Address::from_str(required(lookup, &key("POOL_ADDRESS"))?.trim())
        .map_err(|_| eyre!("{} must be a valid address", key("POOL_ADDRESS")))?;

    let private_key = lookup(&key("PRIVATE_KEY"))
        .or_else(|| shared_key.map(str::to_string))
        .ok_or_else(|| {
            eyre!(
                "{} or PRIVATE_KEY environment variable is required",
                key("PRIVATE_KEY")
            )
        })?;

    Ok(ChainConfig {
        name: lookup(&key("NAME")).unwrap_or_else(|| default_name.to_string()),
        rpc_url: rpc_urls[0].clone(),
        rpc_fallback_urls: rpc_urls[1..].to_vec(),
        ws_url: lookup(&key("WS_URL")).filter(|v| !v.trim().is_empty()),
        chain_id: required(lookup, &key("CHAIN_ID"))?
            .trim()
            .parse()
            .wrap_err_with(|| format!("{} must be a valid u64", key("CHAIN_ID")))?,
        pool_address,
        private_key: Redacted(private_key.trim().to_string()),
        window_blocks: parse_or(lookup, &key("WINDOW_BLOCKS"), default_window_blocks())?,
        finality_blocks: parse_or(lookup, &key("FINALITY_BLOCKS"), default_finality_blocks())?,
        max_block_range: parse_or(lookup, &key("MAX_BLOCK_RANGE"), default_max_block_range())?,
    })
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).ok_or_else(|| eyre!("{} environment variable is required", key))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| eyre!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
