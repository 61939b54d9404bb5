use std::path::Path;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::geoip::Provider;
use crate::net::DEFAULT_ENDPOINTS;

/// Discover this host's external IP address.
///
/// Races every echo endpoint at once, takes the first answer and remembers
/// which endpoints win so that later runs (in `watch` mode) favor them.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Echo endpoints to race (comma-separated URLs)
    #[arg(
        long,
        env = "NETPULSE_ENDPOINTS",
        value_delimiter = ',',
        default_values_t = DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect::<Vec<_>>()
    )]
    pub endpoints: Vec<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "NETPULSE_TIMEOUT", default_value_t = 5)]
    pub timeout: u64,

    /// Overall race deadline in seconds
    #[arg(long, env = "NETPULSE_DEADLINE", default_value_t = 5)]
    pub deadline: u64,

    /// Re-discovery interval in seconds for `watch`
    #[arg(long, env = "NETPULSE_INTERVAL", default_value_t = 60)]
    pub interval: u64,

    /// Geolocation providers, tried in order (ipapi, freeipapi, ifconfigco, ipwho)
    #[arg(
        long,
        env = "NETPULSE_GEO_PROVIDERS",
        value_delimiter = ',',
        default_values_t = Provider::ALL.to_vec()
    )]
    pub geo_providers: Vec<Provider>,

    /// How long geolocation results are cached, in seconds
    #[arg(long, env = "NETPULSE_GEO_CACHE_TTL", default_value_t = 3600)]
    pub geo_cache_ttl: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "NETPULSE_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "NETPULSE_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Print results as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the external address (default)
    External,
    /// Print the address used for outbound traffic on the local network
    Internal,
    /// Geolocate an address (defaults to the external address)
    Geo { ip: Option<String> },
    /// Keep re-discovering the external address and log changes
    Watch,
}

impl Config {
    pub fn per_request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn race_deadline(&self) -> Duration {
        Duration::from_secs(self.deadline)
    }

    /// Reject settings that would make every race fail.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout == 0 || self.deadline == 0 {
            anyhow::bail!("--timeout and --deadline must be at least 1 second");
        }
        if self.interval == 0 {
            anyhow::bail!("--interval must be at least 1 second");
        }
        for endpoint in &self.endpoints {
            let url = url::Url::parse(endpoint)
                .map_err(|e| anyhow::anyhow!("invalid endpoint '{}': {}", endpoint, e))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("endpoint '{}' must use http or https", endpoint);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TOML config file support
// ---------------------------------------------------------------------------

/// Optional settings read from `netpulse.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_providers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo_cache_ttl: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_json: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Environment variables this file would set, skipping any already
    /// present so the precedence stays CLI > env > config file.
    fn env_defaults(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        macro_rules! set {
            ($env:expr, $val:expr) => {
                if let Some(ref v) = $val {
                    if std::env::var($env).is_err() {
                        out.push(($env, v.to_string()));
                    }
                }
            };
        }
        set!("NETPULSE_TIMEOUT", self.timeout);
        set!("NETPULSE_DEADLINE", self.deadline);
        set!("NETPULSE_INTERVAL", self.interval);
        set!("NETPULSE_GEO_CACHE_TTL", self.geo_cache_ttl);
        set!("NETPULSE_LOG_LEVEL", self.log_level);
        set!("NETPULSE_LOG_JSON", self.log_json);

        // lists are passed to clap comma-separated
        set!("NETPULSE_ENDPOINTS", self.endpoints.as_ref().map(|v| v.join(",")));
        set!(
            "NETPULSE_GEO_PROVIDERS",
            self.geo_providers.as_ref().map(|v| v.join(","))
        );
        out
    }

    /// Inject values as environment variables so clap picks them up.
    pub fn inject_env(&self) {
        for (key, value) in self.env_defaults() {
            std::env::set_var(key, value);
        }
    }
}
