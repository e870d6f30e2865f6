//! Top-level configuration for the exporter.
//!
//! This module aggregates configuration for:
//!
//! - the node RPC client (URL + per-call timeout),
//! - the collector (block walk bound, cache size, identity refresh),
//! - the poller (interval + shutdown grace period),
//! - the publisher (listen address).
//!
//! Every section has a `Default`; [`ExporterConfig::from_cli`] overlays
//! the command line on top of the defaults and validates the result.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use reqwest::Url;
use thiserror::Error;

/// Fatal configuration problems, reported before anything is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid exporter address {0:?}: expected an IP address")]
    InvalidAddress(String),
    #[error("invalid RPC URL {url:?}: {reason}")]
    InvalidRpcUrl { url: String, reason: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Command line of the `polkadot-exporter` binary.
#[derive(Debug, Parser)]
#[command(name = "polkadot-exporter")]
#[command(about = "Prometheus exporter for Polkadot relay chain nodes")]
#[command(version)]
pub struct Cli {
    /// Expose metrics on this port
    #[arg(long = "exporter_port", default_value_t = 8000)]
    pub exporter_port: u16,

    /// Expose metrics on this address (all interfaces if empty)
    #[arg(long = "exporter_address", default_value = "")]
    pub exporter_address: String,

    /// Polkadot node RPC URL
    #[arg(long = "rpc_url", default_value = "http://127.0.0.1:9933/")]
    pub rpc_url: String,

    /// Timeout of a single RPC call, in milliseconds
    #[arg(long = "rpc_timeout_ms", default_value_t = 3000)]
    pub rpc_timeout_ms: u64,

    /// Interval between two polls of the node, in milliseconds
    #[arg(long = "poll_interval_ms", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Upper bound on the number of blocks walked in one poll
    #[arg(long = "max_blocks_per_poll", default_value_t = 64)]
    pub max_blocks_per_poll: u64,
}

/// Configuration of the node RPC client.
#[derive(Clone, Debug)]
pub struct RpcConfig {
    /// JSON-RPC endpoint of the node, e.g. `"http://127.0.0.1:9933/"`.
    pub url: String,
    /// Timeout applied to every RPC call.
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9933/".to_string(),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Configuration of the collector.
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    /// Maximum number of blocks counted per poll when catching up.
    pub max_blocks_per_poll: u64,
    /// Number of blocks kept in the block cache after pruning.
    pub block_cache_size: usize,
    /// How often node name/version/chain and runtime version are refreshed.
    pub identity_refresh: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_blocks_per_poll: 64,
            block_cache_size: 256,
            identity_refresh: Duration::from_secs(5 * 60),
        }
    }
}

/// Configuration of the poller.
#[derive(Clone, Debug)]
pub struct PollerConfig {
    /// Fixed interval between poll starts.
    pub interval: Duration,
    /// How long an in-flight poll may keep running after shutdown starts.
    pub shutdown_grace: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

/// Configuration of the `/metrics` HTTP server.
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    pub listen_addr: SocketAddr,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000),
        }
    }
}

/// Top-level exporter configuration.
#[derive(Clone, Debug, Default)]
pub struct ExporterConfig {
    pub rpc: RpcConfig,
    pub collector: CollectorConfig,
    pub poller: PollerConfig,
    pub publisher: PublisherConfig,
}

impl ExporterConfig {
    /// Builds and validates the configuration from parsed CLI arguments.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ip = parse_listen_ip(&cli.exporter_address)?;
        validate_rpc_url(&cli.rpc_url)?;

        if cli.rpc_timeout_ms == 0 {
            return Err(ConfigError::Zero("--rpc_timeout_ms"));
        }
        if cli.poll_interval_ms == 0 {
            return Err(ConfigError::Zero("--poll_interval_ms"));
        }
        if cli.max_blocks_per_poll == 0 {
            return Err(ConfigError::Zero("--max_blocks_per_poll"));
        }

        Ok(Self {
            rpc: RpcConfig {
                url: cli.rpc_url.clone(),
                timeout: Duration::from_millis(cli.rpc_timeout_ms),
            },
            collector: CollectorConfig {
                max_blocks_per_poll: cli.max_blocks_per_poll,
                ..defaults.collector
            },
            poller: PollerConfig {
                interval: Duration::from_millis(cli.poll_interval_ms),
                ..defaults.poller
            },
            publisher: PublisherConfig {
                listen_addr: SocketAddr::new(ip, cli.exporter_port),
            },
        })
    }
}

fn parse_listen_ip(addr: &str) -> Result<IpAddr, ConfigError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
    addr.parse()
        .map_err(|_| ConfigError::InvalidAddress(addr.to_string()))
}

fn validate_rpc_url(url: &str) -> Result<(), ConfigError> {
    let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidRpcUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidRpcUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}
