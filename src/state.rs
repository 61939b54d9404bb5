//! Shared application state passed to every command.

use std::sync::Arc;

use crate::config::Config;
use crate::geoip;
use crate::probe::HttpProbe;
use crate::race::Race;
use crate::scorer::EndpointScorer;

/// Everything a command needs, built once at startup.
pub struct AppState {
    pub config: Arc<Config>,
    /// Endpoint ranking, shared across every race in this process.
    pub scorer: Arc<EndpointScorer>,
    pub race: Race<HttpProbe>,
    pub geo: geoip::Engine,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let scorer = Arc::new(EndpointScorer::from_endpoints(config.endpoints.iter().cloned()));
        let probe = HttpProbe::new(concat!("netpulse/", env!("CARGO_PKG_VERSION")))?;
        let race = Race::new(Arc::clone(&scorer), Arc::new(probe));
        let geo = geoip::Engine::new(
            config.geo_providers.clone(),
            std::time::Duration::from_secs(config.geo_cache_ttl),
        )?;

        Ok(Self {
            config: Arc::new(config),
            scorer,
            race,
            geo,
        })
    }
}
