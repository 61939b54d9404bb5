use clap::Parser;

use netpulse::app;
use netpulse::config::{Config, ConfigFile};

/// Default config file name.
const DEFAULT_CONFIG: &str = "netpulse.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config file as env-var defaults (before clap)
    let config_file_path =
        std::env::var("NETPULSE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let path = std::path::Path::new(&config_file_path);
    if path.exists() {
        match ConfigFile::load(path) {
            Ok(file_cfg) => file_cfg.inject_env(),
            Err(e) => eprintln!("Warning: ignoring {}: {}", path.display(), e),
        }
    }

    let config = Config::parse();
    config.validate()?;

    app::run(config).await
}
