//! HTTP fetcher with retries, jittered backoff, and a hard size cap.

use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::models::CrawlConfig;

const REQUEST_TIMEOUT_SECS: u64 = 30;
const POOL_IDLE_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;
const RETRY_JITTER_MS: u64 = 1000;

const ACCEPT_VALUE: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE_VALUE: &str = "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("404 Not Found: {0}")]
    NotFound(String),

    #[error("status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timeout")]
    Timeout,

    #[error("file too large: {0} bytes (max: {1} bytes)")]
    TooLarge(usize, u64),

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("fetch cancelled")]
    Cancelled,

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

impl FetchError {
    fn from_reqwest_error(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return FetchError::Timeout;
        }
        FetchError::Network(error.to_string())
    }

    /// 404 and oversize responses are terminal; everything else retries.
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            FetchError::NotFound(_) | FetchError::TooLarge(_, _) | FetchError::Cancelled
        )
    }
}

/// A wrapping HTTP client shared by all workers of a job.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    retries: u32,
    delay: Duration,
    max_size: u64,
}

impl Fetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .pool_max_idle_per_host(config.workers * 2)
            .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            retries: config.retries.max(1),
            delay: Duration::from_millis(config.delay_ms),
            max_size: config.max_file_size,
        })
    }

    /// GET a URL, returning its body bytes and Content-Type.
    ///
    /// Retries transport errors and non-200/404 statuses with
    /// `delay + rand(0..1s)` sleeps between attempts. A 404 is terminal, as
    /// is a body exceeding the size cap.
    pub async fn fetch(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<u8>, String), FetchError> {
        let mut last_error = FetchError::Network("no attempts made".to_string());

        for attempt in 1..=self.retries {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            match self.attempt(url, cancel).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    tracing::warn!(url, attempt, error = %e, "fetch attempt failed");
                    last_error = e;
                    if attempt < self.retries {
                        let jitter = rand::thread_rng().gen_range(0..RETRY_JITTER_MS);
                        let pause = self.delay + Duration::from_millis(jitter);
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                }
            }
        }

        Err(last_error)
    }

    async fn attempt(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<u8>, String), FetchError> {
        let request = self
            .client
            .get(url)
            .header(REFERER, referer_for(url))
            .header(ACCEPT, ACCEPT_VALUE)
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = request.send() => result.map_err(FetchError::from_reqwest_error)?,
        };

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if status.as_u16() != 200 {
            return Err(FetchError::Status(status.as_u16()));
        }

        if response.url().as_str() != url {
            tracing::debug!(from = url, to = %response.url(), "followed redirect");
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if let Some(length) = response.content_length() {
            if length > self.max_size {
                return Err(FetchError::TooLarge(length as usize, self.max_size));
            }
        }

        // Stream the body so the cap holds even without a Content-Length.
        let mut body: Vec<u8> = Vec::new();
        let mut response = response;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                chunk = response.chunk() => chunk.map_err(|e| FetchError::Body(e.to_string()))?,
            };
            let Some(chunk) = chunk else { break };
            if body.len() + chunk.len() > self.max_size as usize {
                return Err(FetchError::TooLarge(body.len() + chunk.len(), self.max_size));
            }
            body.extend_from_slice(&chunk);
        }

        Ok((body, content_type))
    }
}

/// `<scheme>://<host>/` of the target, sent as the Referer.
fn referer_for(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}/",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default()
        ),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referer_is_scheme_and_host() {
        assert_eq!(
            referer_for("https://ex.com/deep/path?q=1"),
            "https://ex.com/"
        );
        assert_eq!(referer_for("http://ex.com"), "http://ex.com/");
    }

    #[test]
    fn test_terminal_errors() {
        assert!(FetchError::NotFound("x".into()).is_terminal());
        assert!(FetchError::TooLarge(10, 5).is_terminal());
        assert!(FetchError::Cancelled.is_terminal());
        assert!(!FetchError::Status(503).is_terminal());
        assert!(!FetchError::Timeout.is_terminal());
    }

    #[test]
    fn test_fetcher_builds_from_config() {
        let fetcher = Fetcher::new(&CrawlConfig::default()).unwrap();
        assert_eq!(fetcher.retries, 5);
        assert_eq!(fetcher.max_size, 15 * 1024 * 1024);
    }
}
