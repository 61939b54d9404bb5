//! IP geolocation via public lookup APIs, with a TTL cache in front.

mod provider;

use std::net::IpAddr;
use std::time::Duration;

use moka::future::Cache;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

pub use provider::Provider;

/// Per-provider request budget.
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(3);

/// Upper bound on cached lookups.
const CACHE_CAPACITY: u64 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    #[error("invalid ip address: {0}")]
    InvalidIp(String),
    #[error("{0} is not a public address")]
    PrivateIp(IpAddr),
    #[error("no geo providers configured")]
    NoProviders,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("lookup rejected: {0}")]
    Rejected(String),
}

/// Normalized geolocation record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Info {
    pub ip: String,
    pub country: String,
    /// Province or state
    pub region: String,
    pub region_code: String,
    pub city: String,
    pub city_code: String,
    pub isp: String,
    /// Human-readable summary, e.g. "Japan Tokyo Koto-ku G-Core Labs S.A"
    pub address: String,
}

/// Looks addresses up against providers in order, first answer wins.
pub struct Engine {
    http: Client,
    providers: Vec<Provider>,
    cache: Cache<IpAddr, Info>,
}

impl Engine {
    pub fn new(providers: Vec<Provider>, cache_ttl: Duration) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(PROVIDER_TIMEOUT).build()?;
        Ok(Self {
            http,
            providers,
            cache: Cache::builder()
                .time_to_live(cache_ttl)
                .max_capacity(CACHE_CAPACITY)
                .build(),
        })
    }

    pub async fn lookup(&self, ip: &str) -> Result<Info, GeoError> {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| GeoError::InvalidIp(ip.to_string()))?;
        if !is_public(addr) {
            return Err(GeoError::PrivateIp(addr));
        }

        if let Some(info) = self.cache.get(&addr).await {
            debug!(ip = %addr, "geo cache hit");
            return Ok(info);
        }

        let mut last_err = GeoError::NoProviders;
        for &provider in &self.providers {
            match self.query(provider, addr).await {
                Ok(info) => {
                    info!(ip = %addr, provider = %provider, address = %info.address, "geolocated");
                    self.cache.insert(addr, info.clone()).await;
                    return Ok(info);
                }
                Err(e) => {
                    debug!(ip = %addr, provider = %provider, error = %e, "geo lookup failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn query(&self, provider: Provider, addr: IpAddr) -> Result<Info, GeoError> {
        let resp = self.http.get(provider.url(&addr.to_string())).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GeoError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        provider.parse(&body)
    }
}

/// Private, loopback and otherwise non-routable addresses have no location.
fn is_public(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            let unique_local = (v6.segments()[0] & 0xfe00) == 0xfc00;
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}
