//! Application lifecycle: tracing init, command dispatch and the `watch`
//! loop with graceful shutdown.

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tokio::signal;
use tracing::{debug, info, warn};

use crate::config::{Command, Config};
use crate::net;
use crate::race::Discovery;
use crate::state::AppState;

/// Run the requested command after config has been parsed.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        endpoints = config.endpoints.len(),
        "netpulse starting"
    );

    let command = config.command.clone().unwrap_or(Command::External);
    let state = AppState::new(config)?;

    match command {
        Command::External => {
            let found = discover(&state).await?;
            print_discovery(&state, &found);
        }
        Command::Internal => {
            let Some(ip) = net::internal_ip().await else {
                anyhow::bail!("failed to detect a local network address");
            };
            if state.config.json {
                println!("{}", json!({ "ip": ip }));
            } else {
                println!("{ip}");
            }
        }
        Command::Geo { ip } => {
            let ip = match ip {
                Some(ip) => ip,
                None => discover(&state).await?.address,
            };
            let info = state.geo.lookup(&ip).await?;
            if state.config.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{} {}", info.ip, info.address);
            }
        }
        Command::Watch => watch(&state).await,
    }

    Ok(())
}

async fn discover(state: &AppState) -> anyhow::Result<Discovery> {
    let found = state
        .race
        .discover_ranked(
            state.config.per_request_timeout(),
            state.config.race_deadline(),
        )
        .await?;
    Ok(found)
}

fn print_discovery(state: &AppState, found: &Discovery) {
    if state.config.json {
        println!(
            "{}",
            discovery_json(found, &state.scorer.snapshot_with_scores())
        );
    } else {
        println!("{}", found.address);
    }
}

/// Winner plus the live endpoint ranking, highest score first.
fn discovery_json(found: &Discovery, scores: &[(String, u64)]) -> serde_json::Value {
    let ranking: Vec<_> = scores
        .iter()
        .map(|(endpoint, score)| json!({ "endpoint": endpoint, "score": score }))
        .collect();
    json!({
        "ip": found.address,
        "endpoint": found.endpoint,
        "elapsed_ms": found.elapsed.as_millis() as u64,
        "scores": ranking,
    })
}

/// Re-run the race every interval, reporting address changes, until a
/// shutdown signal arrives. Failed rounds are logged and retried next tick.
async fn watch(state: &AppState) {
    watch_until(state, wait_for_shutdown()).await;
}

async fn watch_until(state: &AppState, shutdown: impl Future<Output = ()>) {
    let interval = Duration::from_secs(state.config.interval);
    tokio::pin!(shutdown);

    info!(interval_secs = state.config.interval, "watching external address");

    let mut current: Option<String> = None;
    loop {
        // A signal must not wait for an in-flight race to hit its deadline.
        let round = tokio::select! {
            r = discover(state) => r,
            _ = &mut shutdown => break,
        };

        match round {
            Ok(found) => {
                if current.as_deref() != Some(found.address.as_str()) {
                    if let Some(previous) = &current {
                        info!(previous = %previous, address = %found.address, "external address changed");
                    }
                    print_discovery(state, &found);
                    current = Some(found.address);
                }
            }
            Err(e) => warn!(error = %e, "discovery round failed"),
        }

        debug!(scores = ?state.scorer.snapshot_with_scores(), "endpoint ranking");

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut shutdown => break,
        }
    }

    info!("shutdown signal received, stopping");
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    // Logs go to stderr so stdout carries only results.
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn test_discovery_json_includes_ranking() {
        let found = Discovery {
            address: "203.0.113.9".to_string(),
            endpoint: "https://b.example/ip".to_string(),
            elapsed: Duration::from_millis(42),
        };
        let scores = [
            ("https://b.example/ip".to_string(), 3),
            ("https://a.example/ip".to_string(), 0),
        ];

        let out = discovery_json(&found, &scores);

        assert_eq!(out["ip"], "203.0.113.9");
        assert_eq!(out["elapsed_ms"], 42);
        assert_eq!(out["scores"][0]["endpoint"], "https://b.example/ip");
        assert_eq!(out["scores"][0]["score"], 3);
        assert_eq!(out["scores"][1]["score"], 0);
    }

    #[tokio::test]
    async fn test_watch_stops_during_race() {
        // Accepts connections (via the backlog) but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let endpoint = format!("http://{addr}/ip");
        let config = Config::try_parse_from([
            "netpulse",
            "--endpoints",
            endpoint.as_str(),
            "--timeout",
            "30",
            "--deadline",
            "30",
        ])
        .unwrap();
        let state = AppState::new(config).unwrap();

        let started = std::time::Instant::now();
        let stopped = tokio::time::timeout(
            Duration::from_secs(5),
            watch_until(&state, tokio::time::sleep(Duration::from_millis(100))),
        )
        .await;

        assert!(stopped.is_ok());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(state.scorer.score(&endpoint), Some(0));
        drop(listener);
    }
}
