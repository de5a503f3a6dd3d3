use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use jobharvest_core::waiting_screen::{estimate_wait_time, is_waiting_screen};
use jobharvest_core::FailureClass;

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitOpenError};
use crate::rate_limiter::RateLimiterRegistry;
use crate::retry::{retry_with, RetryOutcome, Strategy};

/// A fetched page body plus enough metadata for the extractor and cache to
/// work with (C4/C7).
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http error {status} for {url}")]
    Http { status: u16, url: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("circuit open for host {0}")]
    CircuitOpen(String),
    #[error("retries exhausted after {attempts} attempts: {last_class:?}")]
    Exhausted { attempts: u32, last_class: FailureClass },
}

/// The single generic HTTP driver (replacing per-network drivers): composes
/// the Rate Limiter (C1), Retry Engine (C2), and Circuit Breaker (C3) around
/// a shared [`reqwest::Client`], falling back to a longer wait when the
/// response looks like a DDoS/waiting screen rather than real content.
pub struct Fetcher {
    client: Client,
    rate_limiters: RateLimiterRegistry,
    circuit_breakers: CircuitBreakerRegistry,
    strategy: Strategy,
    user_agent: String,
}

impl Fetcher {
    pub fn new(
        rate_per_second: f64,
        burst: u32,
        circuit_probe_count: usize,
        strategy: Strategy,
        user_agent: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let user_agent = user_agent.unwrap_or_else(|| {
            "Mozilla/5.0 (compatible; jobharvest/0.1; +https://example.invalid/bot)".to_string()
        });
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(user_agent.clone())
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            rate_limiters: RateLimiterRegistry::new(rate_per_second, burst),
            circuit_breakers: CircuitBreakerRegistry::new(circuit_probe_count),
            strategy,
            user_agent,
        })
    }

    fn host_key(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| url.to_string())
    }

    /// Fetch a single URL through rate limiting, retry, and circuit breaking.
    /// A response that looks like a waiting screen is treated as a transient
    /// failure and retried after the estimated wait, rather than returned as
    /// if it were real content.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let host = Self::host_key(url);
        let limiter = self.rate_limiters.for_host(&host);
        let breaker = self.circuit_breakers.for_key(&host);

        let client = self.client.clone();
        let url_owned = url.to_string();

        let breaker_result = breaker
            .call(|| async {
                let outcome = retry_with(
                    self.strategy,
                    |_attempt| {
                        let client = client.clone();
                        let url = url_owned.clone();
                        let limiter = limiter.clone();
                        async move {
                            limiter.acquire().await;
                            do_request(&client, &url).await
                        }
                    },
                    |err: &FetchError| classify(err),
                    |success| {
                        let limiter = limiter.clone();
                        tokio::spawn(async move {
                            limiter.adjust(success).await;
                        });
                    },
                )
                .await;

                match outcome {
                    RetryOutcome::Success(page) => Ok(page),
                    RetryOutcome::Exhausted { attempts, last_class } => {
                        Err(FetchError::Exhausted { attempts, last_class })
                    }
                    RetryOutcome::CircuitOpen => Err(FetchError::CircuitOpen(host.clone())),
                }
            })
            .await;

        match breaker_result {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(e)) => Err(e),
            Err(CircuitOpenError) => {
                warn!(host = %host, "fetcher: circuit open, failing fast");
                Err(FetchError::CircuitOpen(host))
            }
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Whether the circuit for `host` is currently open, for reporting in
    /// [`jobharvest_core::HostOutcome::circuit_tripped`].
    pub async fn host_circuit_open(&self, host: &str) -> bool {
        self.circuit_breakers.for_key(host).state().await == crate::circuit_breaker::CircuitState::Open
    }

    /// Count of hosts whose circuit is currently open, feeding the health
    /// score (§4.11).
    pub async fn open_circuit_count(&self) -> u64 {
        self.circuit_breakers.open_count().await
    }
}

async fn do_request(client: &Client, url: &str) -> Result<FetchedPage, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    if !response.status().is_success() {
        return Err(FetchError::Http {
            status,
            url: url.to_string(),
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;

    if is_waiting_screen(&body, body.len()) {
        let wait = estimate_wait_time(&body);
        debug!(url, wait_seconds = wait, "fetcher: waiting screen detected");
        tokio::time::sleep(Duration::from_secs(wait)).await;
        return Err(FetchError::Transport("waiting screen".to_string()));
    }

    Ok(FetchedPage {
        url: url.to_string(),
        status,
        body,
        content_type,
    })
}

fn classify(err: &FetchError) -> FailureClass {
    match err {
        FetchError::Http { status, .. } => FailureClass::from_status(*status),
        FetchError::Transport(msg) if msg == "waiting screen" => FailureClass::TransientNetwork,
        FetchError::Transport(_) => FailureClass::TransientNetwork,
        FetchError::CircuitOpen(_) => FailureClass::Fatal,
        FetchError::Exhausted { last_class, .. } => *last_class,
    }
}

pub type SharedFetcher = Arc<Fetcher>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Responds to each accepted connection with the next entry of
    /// `responses` in order, repeating the last entry once exhausted.
    /// Connections are handled one at a time so call order matches the
    /// order `fetch` issues its attempts.
    async fn spawn_sequence_server(responses: Vec<(u16, &'static str)>) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let idx = counter.fetch_add(1, Ordering::SeqCst).min(responses.len() - 1);
                let (status, body) = responses[idx];
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let reason = if status == 200 { "OK" } else { "Error" };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), handle)
    }

    #[tokio::test]
    async fn recovers_from_rate_limited_response_via_retry() {
        let (base_url, server) = spawn_sequence_server(vec![
            (429, "slow down"),
            (200, "<html>ok</html>"),
        ])
        .await;

        let fetcher = Fetcher::new(
            1000.0,
            1000,
            3,
            Strategy::Standard,
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let page = fetcher.fetch(&base_url).await.unwrap();
        assert_eq!(page.status, 200);
        assert!(page.body.contains("ok"));
        assert!(!fetcher.host_circuit_open("127.0.0.1").await);

        server.abort();
    }

    #[tokio::test]
    async fn circuit_opens_after_sustained_server_errors() {
        let (base_url, server) = spawn_sequence_server(vec![(500, "broken")]).await;

        let fetcher = Fetcher::new(
            1000.0,
            1000,
            3,
            Strategy::Conservative,
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        for _ in 0..20 {
            let result = fetcher.fetch(&base_url).await;
            assert!(result.is_err());
        }

        assert!(fetcher.host_circuit_open("127.0.0.1").await);

        let before_open_count = fetcher.open_circuit_count().await;
        assert_eq!(before_open_count, 1);

        match fetcher.fetch(&base_url).await {
            Err(FetchError::CircuitOpen(host)) => assert_eq!(host, "127.0.0.1"),
            other => panic!("expected circuit-open fast failure, got {other:?}"),
        }

        server.abort();
    }
}
