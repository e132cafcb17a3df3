//! Source catalog client.
//!
//! Reads the paginated `users` and `carts` collections of a DummyJSON-style
//! catalog API.
//!
//! # API Reference
//!
//! - Base URL: `https://dummyjson.com` (configurable)
//! - Pagination: `GET /{resource}?limit={limit}&skip={skip}`
//! - Envelope: `{ "<resource>": [...], "total": n, "skip": n, "limit": n }`

mod error;

pub use error::FetchError;

use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures::Stream;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use cart_insights_core::Resource;

use crate::config::SourceConfig;
use crate::retry::{RetryConfig, RetryPolicy};

/// One untyped record exactly as the catalog returned it.
///
/// Validation happens in [`crate::transform`]; nothing else inspects these.
pub type RawRecord = Value;

/// One page of a paginated collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub resource: Resource,
    pub skip: u32,
    pub limit: u32,
    /// Collection size reported by the envelope, when present.
    pub total: Option<u64>,
    pub records: Vec<RawRecord>,
}

/// Source catalog client.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct SourceClient {
    inner: Arc<SourceClientInner>,
}

struct SourceClientInner {
    client: reqwest::Client,
    base_url: Url,
    retry: RetryConfig,
}

impl SourceClient {
    /// Create a new source client.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Client` if the HTTP client fails to build.
    pub fn new(config: &SourceConfig, retry: RetryConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("cart-insights/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            inner: Arc::new(SourceClientInner {
                client,
                base_url: config.base_url.clone(),
                retry,
            }),
        })
    }

    /// Lazily page through all users.
    pub fn fetch_users(
        &self,
        page_size: u32,
        max_records: Option<usize>,
    ) -> impl Stream<Item = Result<Page, FetchError>> + '_ {
        self.pages(Resource::Users, page_size, max_records)
    }

    /// Lazily page through all carts.
    pub fn fetch_carts(
        &self,
        page_size: u32,
        max_records: Option<usize>,
    ) -> impl Stream<Item = Result<Page, FetchError>> + '_ {
        self.pages(Resource::Carts, page_size, max_records)
    }

    /// Walk a collection page by page.
    ///
    /// Stops on an empty or short page, when `skip` reaches the reported
    /// total, or once `max_records` records have been yielded (the last page
    /// is truncated to the cap).
    pub fn pages(
        &self,
        resource: Resource,
        page_size: u32,
        max_records: Option<usize>,
    ) -> impl Stream<Item = Result<Page, FetchError>> + '_ {
        try_stream! {
            let limit = page_size.max(1);
            let mut skip: u32 = 0;
            let mut yielded: usize = 0;

            loop {
                if max_records.is_some_and(|cap| yielded >= cap) {
                    break;
                }

                let mut page = self.fetch_page(resource, skip, limit).await?;
                let returned = page.records.len();
                if returned == 0 {
                    break;
                }

                if let Some(cap) = max_records {
                    page.records.truncate(cap.saturating_sub(yielded));
                }
                yielded += page.records.len();

                let next_skip = skip.checked_add(limit);
                let short_page = returned < limit as usize;
                let past_total = page
                    .total
                    .is_some_and(|total| u64::from(skip) + returned as u64 >= total);

                yield page;

                match next_skip {
                    Some(next) if !short_page && !past_total => skip = next,
                    _ => break,
                }
            }
        }
    }

    /// Fetch a single page, retrying transient failures.
    ///
    /// Pages are addressed by offset, so a failed page can be requested again
    /// without restarting the collection.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Fatal` immediately for client errors and malformed
    /// envelopes, and `FetchError::RetriesExhausted` when transient failures
    /// outlast the retry policy.
    pub async fn fetch_page(
        &self,
        resource: Resource,
        skip: u32,
        limit: u32,
    ) -> Result<Page, FetchError> {
        let mut policy = RetryPolicy::new(self.inner.retry.clone());

        loop {
            match self.fetch_page_once(resource, skip, limit).await {
                Ok(page) => return Ok(page),
                Err(err) if err.is_transient() => {
                    let Some(backoff) = policy.next_delay() else {
                        return Err(FetchError::RetriesExhausted {
                            resource,
                            attempts: policy.attempts(),
                            last: Box::new(err),
                        });
                    };
                    let delay = retry_delay(err.retry_after(), backoff, policy.max_delay());
                    warn!(
                        %resource,
                        skip,
                        attempt = policy.attempts(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying page fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_page_once(
        &self,
        resource: Resource,
        skip: u32,
        limit: u32,
    ) -> Result<Page, FetchError> {
        let url = self.page_url(resource, skip, limit)?;
        debug!(%resource, skip, limit, "Fetching page");

        let response = self
            .inner
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_transport(resource, &e))?;

        let status = response.status();
        if status.is_success() {
            let body: Value = response
                .json()
                .await
                .map_err(|e| FetchError::from_transport(resource, &e))?;
            return parse_envelope(resource, skip, limit, body);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status.as_u16(), truncate(&body, 200));

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::Transient {
                resource,
                status: Some(status.as_u16()),
                message,
                retry_after,
            });
        }

        Err(FetchError::Fatal {
            resource,
            status: Some(status.as_u16()),
            message,
        })
    }

    fn page_url(&self, resource: Resource, skip: u32, limit: u32) -> Result<Url, FetchError> {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::InvalidUrl(self.inner.base_url.to_string()))?
            .pop_if_empty()
            .push(resource.path());
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("skip", &skip.to_string());
        Ok(url)
    }
}

impl std::fmt::Debug for SourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

/// Split a page envelope into its records.
fn parse_envelope(
    resource: Resource,
    skip: u32,
    limit: u32,
    body: Value,
) -> Result<Page, FetchError> {
    let fatal = |message: String| FetchError::Fatal {
        resource,
        status: None,
        message,
    };

    let Value::Object(mut envelope) = body else {
        return Err(fatal("response body is not a JSON object".to_owned()));
    };

    let records = match envelope.remove(resource.path()) {
        Some(Value::Array(records)) => records,
        Some(_) => return Err(fatal(format!("`{resource}` is not an array"))),
        None => return Err(fatal(format!("response has no `{resource}` array"))),
    };

    Ok(Page {
        resource,
        skip,
        limit,
        total: envelope.get("total").and_then(Value::as_u64),
        records,
    })
}

/// Wait before the next attempt: a server hint longer than the backoff
/// wins, but never beyond `max`.
fn retry_delay(hint: Option<Duration>, backoff: Duration, max: Duration) -> Duration {
    hint.map_or(backoff, |hint| hint.max(backoff).min(max))
}

fn truncate(s: &str, max_chars: usize) -> &str {
    s.char_indices().nth(max_chars).map_or(s, |(idx, _)| &s[..idx])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use futures::TryStreamExt;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client_for(server: &MockServer, attempts: u32) -> SourceClient {
        let config = SourceConfig {
            base_url: Url::parse(&server.uri()).unwrap(),
            timeout: Duration::from_secs(5),
        };
        SourceClient::new(&config, RetryConfig::immediate(attempts)).unwrap()
    }

    fn users(ids: std::ops::RangeInclusive<i32>) -> Vec<Value> {
        ids.map(|id| json!({"id": id, "firstName": "U"})).collect()
    }

    async fn mount_users_page(server: &MockServer, skip: u32, limit: u32, records: Vec<Value>, total: u64) {
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("skip", skip.to_string()))
            .and(query_param("limit", limit.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": records,
                "total": total,
                "skip": skip,
                "limit": limit,
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_parse_envelope_rejects_non_object() {
        let err = parse_envelope(Resource::Users, 0, 10, json!([1, 2])).unwrap_err();
        assert!(matches!(err, FetchError::Fatal { .. }));
    }

    #[test]
    fn test_parse_envelope_requires_resource_array() {
        let err = parse_envelope(Resource::Carts, 0, 10, json!({"users": []})).unwrap_err();
        assert!(err.to_string().contains("no `carts` array"));

        let err = parse_envelope(Resource::Carts, 0, 10, json!({"carts": {}})).unwrap_err();
        assert!(err.to_string().contains("not an array"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[tokio::test]
    async fn test_pages_until_total_reached() {
        let server = MockServer::start().await;
        mount_users_page(&server, 0, 2, users(1..=2), 5).await;
        mount_users_page(&server, 2, 2, users(3..=4), 5).await;
        mount_users_page(&server, 4, 2, users(5..=5), 5).await;

        let client = client_for(&server, 1);
        let pages: Vec<Page> = client.fetch_users(2, None).try_collect().await.unwrap();

        assert_eq!(pages.len(), 3);
        assert_eq!(pages.iter().map(|p| p.skip).collect::<Vec<_>>(), vec![0, 2, 4]);
        let ids: Vec<i64> = pages
            .iter()
            .flat_map(|p| p.records.iter().map(|r| r["id"].as_i64().unwrap()))
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        let server = MockServer::start().await;
        mount_users_page(&server, 0, 2, users(1..=2), 100).await;
        mount_users_page(&server, 2, 2, Vec::new(), 100).await;

        let client = client_for(&server, 1);
        let pages: Vec<Page> = client.fetch_users(2, None).try_collect().await.unwrap();
        assert_eq!(pages.len(), 1);
    }

    #[tokio::test]
    async fn test_max_records_truncates_last_page() {
        let server = MockServer::start().await;
        mount_users_page(&server, 0, 2, users(1..=2), 10).await;
        mount_users_page(&server, 2, 2, users(3..=4), 10).await;

        let client = client_for(&server, 1);
        let pages: Vec<Page> = client.fetch_users(2, Some(3)).try_collect().await.unwrap();
        let count: usize = pages.iter().map(|p| p.records.len()).sum();
        assert_eq!(count, 3);
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_max_records_issues_no_request() {
        let server = MockServer::start().await;
        let client = client_for(&server, 1);
        let pages: Vec<Page> = client.fetch_carts(10, Some(0)).try_collect().await.unwrap();
        assert!(pages.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount_users_page(&server, 0, 10, users(1..=3), 3).await;

        let client = client_for(&server, 4);
        let page = client.fetch_page(Resource::Users, 0, 10).await.unwrap();
        assert_eq!(page.records.len(), 3);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[test]
    fn test_retry_delay_prefers_longer_hint() {
        let delay = retry_delay(
            Some(Duration::from_secs(3)),
            Duration::from_secs(1),
            Duration::from_secs(8),
        );
        assert_eq!(delay, Duration::from_secs(3));
    }

    #[test]
    fn test_retry_delay_keeps_longer_backoff() {
        let backoff = Duration::from_secs(2);
        assert_eq!(
            retry_delay(Some(Duration::from_millis(100)), backoff, Duration::from_secs(8)),
            backoff
        );
        assert_eq!(retry_delay(None, backoff, Duration::from_secs(8)), backoff);
    }

    #[test]
    fn test_retry_delay_hint_is_capped() {
        let delay = retry_delay(
            Some(Duration::from_secs(120)),
            Duration::from_secs(1),
            Duration::from_secs(8),
        );
        assert_eq!(delay, Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_long_retry_after_is_capped_by_policy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3600"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_users_page(&server, 0, 10, users(1..=1), 1).await;

        let client = client_for(&server, 2);
        let page = tokio::time::timeout(
            Duration::from_secs(5),
            client.fetch_page(Resource::Users, 0, 10),
        )
        .await
        .expect("a one hour hint must be capped at the policy's max delay")
        .unwrap();
        assert_eq!(page.records.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_users_page(&server, 0, 10, users(1..=1), 1).await;

        let client = client_for(&server, 2);
        let page = client.fetch_page(Resource::Users, 0, 10).await.unwrap();
        assert_eq!(page.records.len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/carts"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        let err = client.fetch_page(Resource::Carts, 0, 10).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(err.status(), Some(500));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_client_error_is_fatal_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server, 4);
        let err = client.fetch_page(Resource::Users, 0, 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Fatal { status: Some(404), .. }));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client_for(&server, 4);
        let err = client.fetch_page(Resource::Users, 0, 10).await.unwrap_err();
        assert!(matches!(err, FetchError::Fatal { .. }));
    }
}
