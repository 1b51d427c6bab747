//! PostgREST (Supabase REST) table store with bounded concurrency and retry/backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{StatusCode, Url};
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::{Filter, Predicate, Row, StoreError, TablePage, TableQuery, TableStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl RestStoreConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(20),
            global_concurrency: 16,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct RestTableStore {
    client: reqwest::Client,
    base_url: Url,
    limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl RestTableStore {
    pub fn new(config: RestStoreConfig) -> Result<Self, StoreError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| StoreError::Config(format!("invalid base url `{}`: {e}", config.base_url)))?;

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| StoreError::Config("api key is not a valid header value".to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| StoreError::Config("api key is not a valid header value".to_string()))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("prefer", HeaderValue::from_static("count=exact"));

        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url,
            limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Config(format!("base url `{}` cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["rest", "v1", table]);
        Ok(url)
    }

    async fn fetch_page(&self, query: &TableQuery) -> Result<TablePage, StoreError> {
        let _permit = self
            .limit
            .acquire()
            .await
            .map_err(|_| StoreError::Config("request limiter closed".to_string()))?;

        let url = self.table_url(&query.table)?;
        let params = query_params(query);

        let mut last_request_error: Option<reqwest::Error> = None;
        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url.clone()).query(&params).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let total = resp
                            .headers()
                            .get(CONTENT_RANGE)
                            .and_then(|v| v.to_str().ok())
                            .and_then(parse_content_range_total);
                        let body: JsonValue = resp.json().await?;
                        let rows = rows_from_body(body)?;
                        let count = total.unwrap_or(rows.len() as u64);
                        return Ok(TablePage { rows, count });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tracing::debug!(%status, attempt, "retrying table query");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(StoreError::HttpStatus {
                        status: status.as_u16(),
                        table: query.table.clone(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tracing::debug!(error = %err, attempt, "retrying table query");
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(StoreError::Request(err));
                }
            }
        }

        match last_request_error {
            Some(err) => Err(StoreError::Request(err)),
            None => Err(StoreError::Decode("retry loop exhausted without a response".to_string())),
        }
    }
}

#[async_trait]
impl TableStore for RestTableStore {
    async fn query(&self, query: &TableQuery) -> Result<TablePage, StoreError> {
        let span = tracing::info_span!("rest_query", table = %query.table);
        self.fetch_page(query).instrument(span).await
    }
}

fn rows_from_body(body: JsonValue) -> Result<Vec<Row>, StoreError> {
    match body {
        JsonValue::Array(items) => Ok(items
            .into_iter()
            .filter_map(|v| match v {
                JsonValue::Object(map) => Some(map),
                _ => None,
            })
            .collect()),
        other => Err(StoreError::Decode(format!(
            "expected a JSON array of rows, got {}",
            truncate(&other.to_string(), 120)
        ))),
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// `Content-Range: 0-24/3573` → `3573`. Returns `None` for an unknown total (`*`).
pub(crate) fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

pub(crate) fn query_params(query: &TableQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    if let Some((key, value)) = filter_param(&query.filter) {
        params.push((key.to_string(), value));
    }
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push((
            "order".to_string(),
            format!("{}.{}.nullslast", quote_column(&order.column), direction),
        ));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if query.offset > 0 {
        params.push(("offset".to_string(), query.offset.to_string()));
    }
    params
}

fn filter_param(filter: &Filter) -> Option<(&'static str, String)> {
    match filter.groups() {
        [] => None,
        [single] => Some(("and", format!("({})", join_predicates(single)))),
        groups => {
            let rendered = groups
                .iter()
                .map(|group| match group.as_slice() {
                    [only] => render_predicate(only),
                    many => format!("and({})", join_predicates(many)),
                })
                .collect::<Vec<_>>()
                .join(",");
            Some(("or", format!("({rendered})")))
        }
    }
}

fn join_predicates(group: &[Predicate]) -> String {
    group.iter().map(render_predicate).collect::<Vec<_>>().join(",")
}

fn render_predicate(predicate: &Predicate) -> String {
    match predicate {
        Predicate::Eq { column, value } => format!("{}.eq.{}", quote_column(column), quote_value(value)),
        Predicate::ILike { column, pattern } => format!(
            "{}.ilike.{}",
            quote_column(column),
            quote_value(&postgrest_pattern(pattern))
        ),
        Predicate::Gte { column, value } => format!("{}.gte.{}", quote_column(column), value),
        Predicate::Lte { column, value } => format!("{}.lte.{}", quote_column(column), value),
    }
}

/// PostgREST spells the `%` wildcard as `*` inside URLs; escaped characters pass through.
fn postgrest_pattern(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                out.push('\\');
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '%' => out.push('*'),
            c => out.push(c),
        }
    }
    out
}

fn quote_column(column: &str) -> String {
    if column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        column.to_string()
    } else {
        format!("\"{}\"", column.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn quote_value(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
