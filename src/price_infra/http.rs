use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use crate::error::{Error, Result, SourceError};
use crate::observability::metrics::SOURCE_REQUESTS_TOTAL;
use crate::price_infra::rate_limiter::RateLimiter;
use crate::price_infra::retry::RetryPolicy;
use crate::types::SourceId;

const USER_AGENT: &str = concat!("price-tracker/", env!("CARGO_PKG_VERSION"));

/// Rate-limited, retrying JSON client shared by the source adapters.
///
/// Every attempt, retries included, takes one slot from the source's limiter.
pub struct SourceHttpClient {
    source_id: SourceId,
    client: Client,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl SourceHttpClient {
    pub fn new(
        source_id: SourceId,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::ConfigError(format!("HTTP client for {}: {}", source_id, e)))?;

        Ok(SourceHttpClient {
            source_id,
            client,
            limiter,
            retry,
        })
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    /// GET against a keyless endpoint. A 401 or 403 here is the source throttling or blocking
    /// us, so it is reported as rate limiting rather than a rejected credential.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, SourceError> {
        self.request(url, query, false).await
    }

    /// GET carrying the source's API key. A 401 or 403 means the key was rejected.
    pub async fn get_json_authenticated<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, SourceError> {
        self.request(url, query, true).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        credentialed: bool,
    ) -> std::result::Result<T, SourceError> {
        let mut attempt = 1;
        loop {
            match self.get_once(url, query, credentialed).await {
                Ok(value) => {
                    SOURCE_REQUESTS_TOTAL
                        .with_label_values(&[self.source_id.as_str(), "ok"])
                        .inc();
                    return Ok(value);
                }
                Err(err) => {
                    SOURCE_REQUESTS_TOTAL
                        .with_label_values(&[self.source_id.as_str(), err.kind()])
                        .inc();

                    match self.retry.backoff(attempt, &err) {
                        Some(delay) => {
                            warn!(
                                source_id = %self.source_id,
                                attempt,
                                max_attempts = self.retry.max_attempts(),
                                delay_ms = delay.as_millis() as u64,
                                "Request failed: {}. Retrying", err
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        credentialed: bool,
    ) -> std::result::Result<T, SourceError> {
        self.limiter.acquire().await;
        debug!(source_id = %self.source_id, url, "Calling price source");

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body, credentialed));
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout
            } else {
                SourceError::Data(format!("undecodable body: {}", e))
            }
        })
    }
}

pub fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
    credentialed: bool,
) -> SourceError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN if credentialed => {
            SourceError::Credential(format!("{} {}", status, snippet))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(%status, "Keyless request refused: {}", snippet);
            SourceError::RateLimited { retry_after }
        }
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited { retry_after },
        s if s.is_server_error() => SourceError::Network(format!("{} {}", status, snippet)),
        s => SourceError::Data(format!("unexpected status {} {}", s, snippet)),
    }
}

fn classify_transport_error(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout
    } else {
        SourceError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let classify = |status, retry_after| classify_status(status, retry_after, "", true);
        assert!(classify(StatusCode::FORBIDDEN, None).is_credential());
        assert!(classify(StatusCode::UNAUTHORIZED, None).is_credential());
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(2))),
            SourceError::RateLimited { retry_after: Some(Duration::from_secs(2)) }
        );
        assert!(matches!(classify(StatusCode::BAD_GATEWAY, None), SourceError::Network(_)));
        assert!(matches!(classify(StatusCode::NOT_FOUND, None), SourceError::Data(_)));
    }

    #[test]
    fn refusals_without_a_key_are_not_credential_failures() {
        for status in [StatusCode::FORBIDDEN, StatusCode::UNAUTHORIZED] {
            let err = classify_status(status, Some(Duration::from_secs(30)), "blocked", false);
            assert!(!err.is_credential());
            let expected = SourceError::RateLimited { retry_after: Some(Duration::from_secs(30)) };
            assert_eq!(err, expected);
        }
    }
}
