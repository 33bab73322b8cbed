use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::config::LedgerConfig;
use crate::core::error::LedgerError;
use crate::core::models::cost::CredentialUsage;
use crate::core::models::ledger::{lenient_f64, LedgerRecord};

const USAGE_PATH: &str = "/billing/usage";
const API_KEYS_PATH: &str = "/api_keys";
const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One page of the usage listing. Rows that failed to deserialize are counted
/// in `skipped` rather than failing the page.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerPage {
    pub records: Vec<LedgerRecord>,
    pub total_pages: u32,
    pub skipped: usize,
}

/// Everything fetched for one time range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedRange {
    pub records: Vec<LedgerRecord>,
    pub pages: u32,
    /// The page cap was hit before the server ran out of pages.
    pub truncated: bool,
    pub skipped: usize,
}

#[derive(Deserialize)]
struct UsageResponse {
    data: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    total_pages: Option<u32>,
}

#[derive(Deserialize)]
struct ApiKeysResponse {
    #[serde(default)]
    data: Vec<ApiKeyRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyRow {
    #[serde(default)]
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    last6_chars: Option<String>,
    #[serde(default)]
    usage: Option<ApiKeyUsage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyUsage {
    #[serde(default)]
    trailing_seven_days: Option<Spend>,
}

#[derive(Deserialize, Default)]
struct Spend {
    #[serde(default, deserialize_with = "lenient_f64")]
    diem: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    usd: f64,
}

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Authenticated client for the billing admin endpoints.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    page_size: u32,
    retry: RetryPolicy,
}

impl LedgerClient {
    pub fn new(config: &LedgerConfig, api_key: String) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LedgerError::Setup(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            page_size: config.page_size.max(1),
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                base_delay: config.retry_base_delay(),
                max_delay: config.retry_max_delay(),
            },
        })
    }

    /// Build a client from config, resolving the admin key.
    pub fn from_config(config: &LedgerConfig) -> Result<Self, LedgerError> {
        Self::with_key(config, config.resolve_api_key())
    }

    /// Build a client from an already resolved key.
    pub fn with_key(config: &LedgerConfig, api_key: Option<String>) -> Result<Self, LedgerError> {
        let api_key = api_key.ok_or(LedgerError::MissingCredential)?;
        Self::new(config, api_key)
    }

    /// GET a JSON document, retrying transient failures.
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, LedgerError> {
        self.execute_with_retry(path, || self.get_once(path, query))
            .await
    }

    async fn get_once(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, LedgerError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::from_status(status.as_u16(), &body));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| LedgerError::MalformedResponse(e.to_string()))
    }

    async fn execute_with_retry<F, Fut, T>(&self, path: &str, operation: F) -> Result<T, LedgerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let max_attempts = self.retry.max_attempts;
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(path, attempt, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_retryable() => {
                    tracing::warn!(path, error = %error, "non-retryable error");
                    return Err(error);
                }
                Err(error) if attempt >= max_attempts => {
                    tracing::warn!(path, attempts = attempt, error = %error, "all retry attempts exhausted");
                    return Err(error);
                }
                Err(error) => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        path,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Fetch one newest-first page of ledger rows in `[start, end]`.
    pub async fn fetch_page(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: u32,
    ) -> Result<LedgerPage, LedgerError> {
        let query = [
            ("startDate", start.format(QUERY_TIME_FORMAT).to_string()),
            ("endDate", end.format(QUERY_TIME_FORMAT).to_string()),
            ("limit", self.page_size.to_string()),
            ("page", page.to_string()),
            ("sortOrder", "desc".to_string()),
        ];
        let body = self.get_json(USAGE_PATH, &query).await?;
        parse_usage_page(body)
    }

    /// Fetch every page for `[start, end]`, up to `max_pages`.
    ///
    /// Cancellation is checked before each page request, never mid-request.
    pub async fn fetch_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_pages: u32,
        cancel: &CancellationToken,
    ) -> Result<FetchedRange, LedgerError> {
        let mut range = FetchedRange::default();
        let mut page = 1;
        loop {
            if cancel.is_cancelled() {
                tracing::info!(page, "ledger fetch cancelled");
                return Err(LedgerError::Cancelled);
            }

            let fetched = self.fetch_page(start, end, page).await?;
            let row_count = fetched.records.len() + fetched.skipped;
            tracing::debug!(
                page,
                total_pages = fetched.total_pages,
                records = fetched.records.len(),
                skipped = fetched.skipped,
                "fetched ledger page"
            );
            range.pages = page;
            range.skipped += fetched.skipped;
            range.records.extend(fetched.records);

            if row_count == 0 || page >= fetched.total_pages {
                break;
            }
            if page >= max_pages {
                tracing::info!(
                    max_pages,
                    total_pages = fetched.total_pages,
                    "page cap reached, ledger window may be incomplete"
                );
                range.truncated = true;
                break;
            }
            page += 1;
        }
        Ok(range)
    }

    /// Trailing seven-day spend per credential. Credentials with no spend
    /// are left out.
    pub async fn fetch_credentials(&self) -> Result<Vec<CredentialUsage>, LedgerError> {
        let body = self.get_json(API_KEYS_PATH, &[]).await?;
        parse_credentials(body)
    }
}

pub(crate) fn parse_usage_page(body: serde_json::Value) -> Result<LedgerPage, LedgerError> {
    let response: UsageResponse = serde_json::from_value(body)
        .map_err(|e| LedgerError::MalformedResponse(e.to_string()))?;
    let rows = response
        .data
        .ok_or_else(|| LedgerError::MalformedResponse("missing 'data' array".to_string()))?;

    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0;
    for row in rows {
        match serde_json::from_value::<LedgerRecord>(row) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed ledger row");
                skipped += 1;
            }
        }
    }

    let total_pages = response
        .pagination
        .and_then(|p| p.total_pages)
        .unwrap_or(1);
    Ok(LedgerPage {
        records,
        total_pages,
        skipped,
    })
}

fn parse_credentials(body: serde_json::Value) -> Result<Vec<CredentialUsage>, LedgerError> {
    let response: ApiKeysResponse = serde_json::from_value(body)
        .map_err(|e| LedgerError::MalformedResponse(e.to_string()))?;

    Ok(response
        .data
        .into_iter()
        .filter_map(|row| {
            let spend = row
                .usage
                .and_then(|u| u.trailing_seven_days)
                .unwrap_or_default();
            if spend.diem <= 0.0 && spend.usd <= 0.0 {
                return None;
            }
            let name = match row.description.filter(|d| !d.trim().is_empty()) {
                Some(description) => description,
                None => format!(
                    "Key {}",
                    row.last6_chars.as_deref().unwrap_or("unknown")
                ),
            };
            Some(CredentialUsage {
                id: row.id,
                name,
                diem: spend.diem,
                usd: spend.usd,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AuthFailure;
    use chrono::TimeZone;
    use mockito::Matcher;

    fn test_config(base_url: String) -> LedgerConfig {
        LedgerConfig {
            base_url,
            page_size: 2,
            max_pages: 3,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 5,
            request_timeout_secs: 5,
            ..LedgerConfig::default()
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 11, 22, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 11, 29, 0, 0, 0).unwrap(),
        )
    }

    fn page_body(timestamps: &[&str], total_pages: u32) -> String {
        let rows: Vec<serde_json::Value> = timestamps
            .iter()
            .map(|ts| {
                serde_json::json!({
                    "sku": "qwen3-4b-llm-input-mtoken",
                    "amount": -0.01,
                    "currency": "DIEM",
                    "units": 0.001,
                    "pricePerUnitUsd": 0.05,
                    "timestamp": ts,
                    "inferenceDetails": { "requestId": ts, "promptTokens": 1000, "completionTokens": 10 }
                })
            })
            .collect();
        serde_json::json!({ "data": rows, "pagination": { "totalPages": total_pages } }).to_string()
    }

    #[test]
    fn retry_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
    }

    #[test]
    fn page_parser_skips_bad_rows() {
        let body = serde_json::json!({
            "data": [
                { "sku": "a", "amount": -1.0, "currency": "USD", "timestamp": "2025-11-29T10:00:00Z" },
                { "sku": "b", "currency": "USD" }
            ],
            "pagination": { "totalPages": 4 }
        });
        let page = parse_usage_page(body).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.skipped, 1);
        assert_eq!(page.total_pages, 4);
    }

    #[test]
    fn page_parser_requires_data() {
        let err = parse_usage_page(serde_json::json!({ "error": "nope" })).unwrap_err();
        assert!(matches!(err, LedgerError::MalformedResponse(_)));
    }

    #[test]
    fn page_parser_defaults_to_single_page() {
        let page = parse_usage_page(serde_json::json!({ "data": [] })).unwrap();
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn credentials_use_description_or_suffix() {
        let body = serde_json::json!({
            "data": [
                { "id": "k1", "description": "prod", "usage": { "trailingSevenDays": { "diem": "12.5", "usd": 0 } } },
                { "id": "k2", "last6Chars": "abc123", "usage": { "trailingSevenDays": { "diem": 1.0, "usd": "0.5" } } },
                { "id": "k3", "description": "idle", "usage": { "trailingSevenDays": { "diem": 0, "usd": 0 } } }
            ]
        });
        let creds = parse_credentials(body).unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].name, "prod");
        assert_eq!(creds[0].diem, 12.5);
        assert_eq!(creds[1].name, "Key abc123");
        assert!((creds[1].total() - 1.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn fetch_range_follows_pagination() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/billing/usage")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("limit".into(), "2".into()),
                Matcher::UrlEncoded("sortOrder".into(), "desc".into()),
                Matcher::UrlEncoded("startDate".into(), "2025-11-22T00:00:00Z".into()),
            ]))
            .match_header("authorization", "Bearer admin-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(&["2025-11-28T10:00:00Z", "2025-11-28T09:00:00Z"], 2))
            .create_async()
            .await;
        let second = server
            .mock("GET", "/billing/usage")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_body(&["2025-11-27T10:00:00Z"], 2))
            .create_async()
            .await;

        let client = LedgerClient::new(&test_config(server.url()), "admin-key".into()).unwrap();
        let (start, end) = window();
        let range = client
            .fetch_range(start, end, 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(range.records.len(), 3);
        assert_eq!(range.pages, 2);
        assert!(!range.truncated);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_range_stops_at_page_cap() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/billing/usage")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(page_body(&["2025-11-28T10:00:00Z"], 50))
            .expect(3)
            .create_async()
            .await;

        let client = LedgerClient::new(&test_config(server.url()), "k".into()).unwrap();
        let (start, end) = window();
        let range = client
            .fetch_range(start, end, 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(range.pages, 3);
        assert!(range.truncated);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/billing/usage")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("bad gateway")
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/billing/usage")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(page_body(&["2025-11-28T10:00:00Z"], 1))
            .expect(1)
            .create_async()
            .await;

        let client = LedgerClient::new(&test_config(server.url()), "k".into()).unwrap();
        let (start, end) = window();
        let page = client.fetch_page(start, end, 1).await.unwrap();

        assert_eq!(page.records.len(), 1);
        failing.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/billing/usage")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = LedgerClient::new(&test_config(server.url()), "k".into()).unwrap();
        let (start, end) = window();
        let err = client.fetch_page(start, end, 1).await.unwrap_err();

        assert!(err.is_retryable());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn forbidden_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/billing/usage")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":"admin key required"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = LedgerClient::new(&test_config(server.url()), "k".into()).unwrap();
        let (start, end) = window();
        let err = client.fetch_page(start, end, 1).await.unwrap_err();

        assert!(matches!(
            err,
            LedgerError::Authorization {
                kind: AuthFailure::InsufficientScope,
                ..
            }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_page() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/billing/usage")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = LedgerClient::new(&test_config(server.url()), "k".into()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let (start, end) = window();
        let err = client.fetch_range(start, end, 3, &token).await.unwrap_err();

        assert_eq!(err, LedgerError::Cancelled);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn fetch_credentials_parses_api_keys() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api_keys")
            .with_status(200)
            .with_body(
                r#"{"data":[{"id":"k1","description":"ci","usage":{"trailingSevenDays":{"diem":"3.0","usd":"0"}}}]}"#,
            )
            .create_async()
            .await;

        let client = LedgerClient::new(&test_config(server.url()), "k".into()).unwrap();
        let creds = client.fetch_credentials().await.unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].name, "ci");
    }

    #[test]
    fn missing_key_is_reported() {
        let config = LedgerConfig {
            api_key: None,
            ..LedgerConfig::default()
        };
        let err = LedgerClient::with_key(&config, config.api_key_with_env(None)).unwrap_err();
        assert_eq!(err, LedgerError::MissingCredential);

        let blank = LedgerConfig {
            api_key: Some("   ".to_string()),
            ..LedgerConfig::default()
        };
        let err = LedgerClient::with_key(&blank, blank.api_key_with_env(None)).unwrap_err();
        assert_eq!(err, LedgerError::MissingCredential);
    }
}
