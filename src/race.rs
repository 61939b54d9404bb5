//! Race coordinator: fan a probe out to every candidate endpoint, keep the
//! first usable answer and cancel the rest.
//!
//! Flow per call: launch one task per candidate -> wait for the first winner
//! or the deadline -> cancel + abort the losers -> credit the winner in the
//! [`EndpointScorer`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::scorer::EndpointScorer;

/// Failure of a single probe. Never escapes a race; losing probes are only
/// logged.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("response body exceeds {limit} bytes")]
    Oversized { limit: usize },
    #[error("response body is not valid UTF-8")]
    NotUtf8,
    #[error("response body is empty")]
    Empty,
}

/// Outcome of a race that produced no address.
#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    #[error("no candidate endpoints to race")]
    NoCandidates,
    #[error("no endpoint answered within {0:?}")]
    DeadlineExceeded(Duration),
    #[error("all {attempted} endpoints failed")]
    AllFailed { attempted: usize },
}

/// One bounded read against an endpoint.
///
/// Implementations return the raw, already size-capped body of a successful
/// response; the coordinator decides whether it holds a usable value.
pub trait Probe: Send + Sync + 'static {
    fn fetch(
        &self,
        endpoint: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Bytes, ProbeError>> + Send;
}

/// A race winner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub address: String,
    pub endpoint: String,
    pub elapsed: Duration,
}

/// Races probes across endpoints and feeds winners back into a shared scorer.
pub struct Race<P> {
    scorer: Arc<EndpointScorer>,
    probe: Arc<P>,
}

impl<P> Clone for Race<P> {
    fn clone(&self) -> Self {
        Self {
            scorer: Arc::clone(&self.scorer),
            probe: Arc::clone(&self.probe),
        }
    }
}

impl<P: Probe> Race<P> {
    pub fn new(scorer: Arc<EndpointScorer>, probe: Arc<P>) -> Self {
        Self { scorer, probe }
    }

    pub fn scorer(&self) -> &Arc<EndpointScorer> {
        &self.scorer
    }

    /// Race every endpoint currently registered in the scorer.
    pub async fn discover_ranked(
        &self,
        per_request_timeout: Duration,
        deadline: Duration,
    ) -> Result<Discovery, DiscoverError> {
        let candidates = self.scorer.snapshot();
        self.discover(candidates, per_request_timeout, deadline).await
    }

    /// Race `candidates` and return the first usable answer.
    ///
    /// All probes start at once. The call ends when a winner arrives, when
    /// every probe has failed, or when `deadline` elapses, whichever comes
    /// first. Duplicate candidates simply race twice.
    pub async fn discover<I>(
        &self,
        candidates: I,
        per_request_timeout: Duration,
        deadline: Duration,
    ) -> Result<Discovery, DiscoverError>
    where
        I: IntoIterator<Item = String>,
    {
        let started = Instant::now();
        let candidates = candidates.into_iter();

        // Single slot: the first success fills it, later ones are dropped.
        let (win_tx, mut win_rx) = mpsc::channel::<(String, String)>(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut probes = JoinSet::new();

        for endpoint in candidates {
            let probe = Arc::clone(&self.probe);
            let win_tx = win_tx.clone();
            let mut cancel_rx = cancel_rx.clone();

            probes.spawn(async move {
                let result = tokio::select! {
                    r = probe.fetch(&endpoint, per_request_timeout) => r,
                    _ = cancel_rx.changed() => return,
                };

                match result.and_then(decode_address) {
                    Ok(address) => {
                        if *cancel_rx.borrow() {
                            return;
                        }
                        // Never block: a full slot means someone else won.
                        if win_tx.try_send((endpoint.clone(), address)).is_err() {
                            debug!(endpoint = %endpoint, "probe succeeded after race was decided");
                        }
                    }
                    Err(e) => {
                        debug!(endpoint = %endpoint, error = %e, "probe failed");
                    }
                }
            });
        }
        // Only the probes hold senders now; `recv` yields `None` once all
        // of them have finished without a winner.
        drop(win_tx);

        let attempted = probes.len();
        if attempted == 0 {
            return Err(DiscoverError::NoCandidates);
        }

        let outcome = tokio::time::timeout(deadline, win_rx.recv()).await;

        let _ = cancel_tx.send(true);
        probes.abort_all();

        match outcome {
            Ok(Some((endpoint, address))) => {
                self.scorer.record_success(&endpoint);
                let elapsed = started.elapsed();
                info!(
                    address = %address,
                    endpoint = %endpoint,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "external address discovered"
                );
                Ok(Discovery {
                    address,
                    endpoint,
                    elapsed,
                })
            }
            Ok(None) => Err(DiscoverError::AllFailed { attempted }),
            Err(_) => Err(DiscoverError::DeadlineExceeded(deadline)),
        }
    }
}

/// Turn a capped response body into an address string.
fn decode_address(body: Bytes) -> Result<String, ProbeError> {
    let text = std::str::from_utf8(&body).map_err(|_| ProbeError::NotUtf8)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ProbeError::Empty);
    }
    Ok(text.to_string())
}
