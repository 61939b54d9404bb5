//! HTTP transport for the race: one GET per endpoint with a hard cap on how
//! much of the body is read.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::Client;

use crate::race::{Probe, ProbeError};

/// Echo endpoints answer with a bare address; anything longer is rejected.
pub const MAX_BODY_BYTES: usize = 128;

/// Probes endpoints with a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: Client,
    limit: usize,
}

impl HttpProbe {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: Client) -> Self {
        Self {
            http,
            limit: MAX_BODY_BYTES,
        }
    }

    async fn get(&self, endpoint: &str, timeout: Duration) -> Result<Bytes, ProbeError> {
        let resp = self.http.get(endpoint).timeout(timeout).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        if resp.content_length().is_some_and(|len| len > self.limit as u64) {
            return Err(ProbeError::Oversized { limit: self.limit });
        }

        let mut body = BytesMut::with_capacity(self.limit);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > self.limit {
                return Err(ProbeError::Oversized { limit: self.limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

impl Probe for HttpProbe {
    async fn fetch(&self, endpoint: &str, timeout: Duration) -> Result<Bytes, ProbeError> {
        self.get(endpoint, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::net::SocketAddr;

    use http_body_util::Full;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    use super::*;

    async fn route(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let (status, body) = match req.uri().path() {
            "/ip" => (StatusCode::OK, Bytes::from_static(b"203.0.113.7\n")),
            "/big" => (StatusCode::OK, Bytes::from(vec![b'1'; 4096])),
            "/slow" => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                (StatusCode::OK, Bytes::from_static(b"203.0.113.8"))
            }
            _ => (StatusCode::NOT_FOUND, Bytes::new()),
        };
        Ok(Response::builder()
            .status(status)
            .body(Full::new(body))
            .unwrap())
    }

    /// Serve [`route`] on a loopback port for the lifetime of the test.
    async fn serve() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service_fn(route))
                        .await;
                });
            }
        });
        addr
    }

    fn probe() -> HttpProbe {
        HttpProbe::new("netpulse-test").unwrap()
    }

    #[tokio::test]
    async fn test_fetch_ok() {
        let addr = serve().await;
        let body = probe()
            .fetch(&format!("http://{addr}/ip"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&body[..], b"203.0.113.7\n");
    }

    #[tokio::test]
    async fn test_fetch_status_error() {
        let addr = serve().await;
        let err = probe()
            .fetch(&format!("http://{addr}/missing"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Status(404)));
    }

    #[tokio::test]
    async fn test_fetch_oversized() {
        let addr = serve().await;
        let err = probe()
            .fetch(&format!("http://{addr}/big"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Oversized { limit: MAX_BODY_BYTES }));
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let addr = serve().await;
        let err = probe()
            .fetch(&format!("http://{addr}/slow"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Transport(e) if e.is_timeout()));
    }

    #[tokio::test]
    async fn test_race_over_http() {
        use std::sync::Arc;

        use crate::race::Race;
        use crate::scorer::EndpointScorer;

        let addr = serve().await;
        let endpoints = ["missing", "big", "ip", "slow"].map(|p| format!("http://{addr}/{p}"));
        let scorer = Arc::new(EndpointScorer::from_endpoints(endpoints.clone()));
        let race = Race::new(Arc::clone(&scorer), Arc::new(probe()));

        let found = race
            .discover_ranked(Duration::from_secs(1), Duration::from_secs(3))
            .await
            .unwrap();

        assert_eq!(found.address, "203.0.113.7");
        assert_eq!(found.endpoint, endpoints[2]);
        assert_eq!(scorer.snapshot()[0], endpoints[2]);
    }
}
