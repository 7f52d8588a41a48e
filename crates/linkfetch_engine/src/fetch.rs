use std::error::Error as _;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use linkfetch_core::{FailureKind, FetchResult, Payload};
use linkfetch_logging::{fetch_debug, fetch_warn};
use rand::seq::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::extract::{Extractor, TextExtractor};
use crate::rate_limit::RateLimiter;
use crate::retry::BackoffPolicy;
use crate::target::parse_target;
use crate::{FetchError, FetchedPage};

const FALLBACK_USER_AGENT: &str = concat!("linkfetch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    /// Bound on one attempt, from sending the request to the end of the body.
    pub request_timeout: Duration,
    pub max_bytes: u64,
    pub max_attempts: u32,
    /// Aggregate start rate across all workers; zero disables the limiter.
    pub requests_per_second: f64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub user_agents: Vec<String>,
    pub backoff: BackoffPolicy,
    pub compression: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_bytes: 5 * 1024 * 1024,
            max_attempts: 3,
            requests_per_second: 5.0,
            pool_max_idle_per_host: 25,
            pool_idle_timeout: Duration::from_secs(90),
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            ],
            backoff: BackoffPolicy::default(),
            compression: true,
        }
    }
}

/// One network attempt. Implementations map non-success statuses to a [`FetchError`].
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url, user_agent: &str) -> Result<FetchedPage, FetchError>;
}

/// Transport over one shared, pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_bytes: u64,
}

impl ReqwestTransport {
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(settings.pool_idle_timeout)
            .gzip(settings.compression)
            .brotli(settings.compression)
            .deflate(settings.compression)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            client,
            max_bytes: settings.max_bytes,
        })
    }

    fn too_large(&self, actual: u64) -> FetchError {
        FetchError::new(
            FailureKind::TooLarge {
                max_bytes: self.max_bytes,
                actual: Some(actual),
            },
            "response too large",
        )
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &Url, user_agent: &str) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::from_status(status.as_u16()),
                status.to_string(),
            ));
        }

        if let Some(content_len) = response.content_length() {
            if content_len > self.max_bytes {
                return Err(self.too_large(content_len));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.max_bytes {
                return Err(self.too_large(next_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchedPage {
            target: url.to_string(),
            final_url,
            content_type,
            bytes,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if is_connection_reset(&err) {
        return FetchError::new(FailureKind::ConnectionReset, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

fn is_connection_reset(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

/// Produces the terminal result for one target. Never fails: every error is
/// folded into the returned [`FetchResult`].
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, target: &str) -> FetchResult;
}

/// Rate-limited, retrying fetch of one target followed by extraction.
pub struct FetchExecutor {
    settings: FetchSettings,
    transport: Arc<dyn Transport>,
    extractor: Arc<dyn Extractor>,
    limiter: RateLimiter,
}

impl FetchExecutor {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let transport = Arc::new(ReqwestTransport::new(&settings)?);
        Ok(Self::with_parts(settings, transport, Arc::new(TextExtractor)))
    }

    pub fn with_extractor(
        settings: FetchSettings,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, FetchError> {
        let transport = Arc::new(ReqwestTransport::new(&settings)?);
        Ok(Self::with_parts(settings, transport, extractor))
    }

    pub fn with_parts(
        settings: FetchSettings,
        transport: Arc<dyn Transport>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let limiter = RateLimiter::new(settings.requests_per_second);
        Self {
            settings,
            transport,
            extractor,
            limiter,
        }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn pick_user_agent(&self) -> &str {
        self.settings
            .user_agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or(FALLBACK_USER_AGENT)
    }

    async fn attempt(&self, url: &Url) -> Result<(Payload, u64), FetchError> {
        self.limiter.acquire().await;
        let user_agent = self.pick_user_agent();
        let page = tokio::time::timeout(
            self.settings.request_timeout,
            self.transport.get(url, user_agent),
        )
        .await
        .map_err(|_| {
            FetchError::new(
                FailureKind::Timeout,
                format!("no response within {:?}", self.settings.request_timeout),
            )
        })??;
        let bytes = page.bytes.len() as u64;
        let payload = self.extractor.extract(&page)?;
        Ok((payload, bytes))
    }
}

#[async_trait::async_trait]
impl Fetcher for FetchExecutor {
    async fn fetch(&self, target: &str) -> FetchResult {
        let started = Instant::now();
        let url = match parse_target(target) {
            Ok(url) => url,
            Err(err) => return FetchResult::failed(err.into_reason(), started.elapsed(), 0),
        };

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(&url).await {
                Ok((payload, bytes)) => {
                    fetch_debug!("Fetched {} in {} attempt(s), {} bytes", url, attempt, bytes);
                    return FetchResult::ok(payload, started.elapsed(), bytes, attempt);
                }
                Err(err) if err.kind.is_retryable() && attempt < max_attempts => {
                    let delay = self.settings.backoff.delay_for(attempt);
                    fetch_warn!(
                        "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt,
                        max_attempts,
                        url,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    fetch_warn!("Giving up on {} after {} attempt(s): {}", url, attempt, err);
                    return FetchResult::failed(err.into_reason(), started.elapsed(), attempt);
                }
            }
        }
    }
}
