use super::retry::RetryDelay;
use super::transport::{Params, Transport};
use crate::config::GraphSettings;
use crate::metrics::Period;
use crate::{Error, Result};
use async_stream::try_stream;
use chrono::NaiveDate;
use futures_util::Stream;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Filter for one insight series request.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightQuery {
    pub metric: String,
    pub period: Period,
    pub since: Option<NaiveDate>,
}

/// Rate limited, retrying Graph API client.
///
/// All clones share one admission gate, so the configured connections limit
/// bounds in-flight requests across every branch of every token.
#[derive(Clone)]
pub struct GraphClient {
    transport: Arc<dyn Transport>,
    gate: Arc<Semaphore>,
    root: String,
    delay_per_request: Duration,
    retry_attempts: u32,
    retry_delay: RetryDelay,
}

impl GraphClient {
    #[tracing::instrument(level = "debug", skip(transport))]
    pub fn new(transport: Arc<dyn Transport>, settings: &GraphSettings) -> Result<Self> {
        if settings.connections_limit == 0 {
            return Err(Error::InvalidInput(
                "connections_limit must be > 0".to_string(),
            ));
        }
        let base = settings.base_url.trim_end_matches('/');
        Url::parse(base).map_err(|e| Error::InvalidInput(format!("invalid graph base url: {e}")))?;
        Ok(Self {
            transport,
            gate: Arc::new(Semaphore::new(settings.connections_limit)),
            root: format!("{}/{}", base, settings.version.trim_matches('/')),
            delay_per_request: settings.delay_per_request,
            retry_attempts: settings.retry_attempts,
            retry_delay: settings.retry_delay,
        })
    }

    /// Versioned endpoint URL, e.g. `{base}/v10.0/{path}`.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let url = format!("{}/{}", self.root, path.trim_start_matches('/'));
        Url::parse(&url).map_err(|e| Error::InvalidInput(format!("invalid endpoint {path}: {e}")))
    }

    /// One logical GET: admission, retries and pacing delay.
    ///
    /// The gate permit is held for the whole retry loop and the trailing
    /// pacing sleep.
    #[tracing::instrument(level = "debug", skip(self, params), fields(path = %url.path()))]
    pub async fn request(&self, url: &Url, params: &Params) -> Result<Value> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::BackendMessage("graph admission gate closed".to_string()))?;

        let mut attempt = 0u32;
        let payload = loop {
            match self.transport.get(url, params).await {
                Ok(payload) => break payload,
                Err(err) if err.is_transient() && attempt < self.retry_attempts => {
                    attempt += 1;
                    let delay = self.retry_delay.delay(self.delay_per_request, attempt);
                    tracing::warn!(
                        path = %url.path(),
                        attempt,
                        delay_ms = millis(delay),
                        error = %err,
                        "graph request failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        };

        if !self.delay_per_request.is_zero() {
            tokio::time::sleep(self.delay_per_request).await;
        }
        Ok(payload)
    }

    /// Lazily walks a `{"data": [...], "paging": {"next": url}}` chain.
    ///
    /// `params` only apply to the first request; `paging.next` urls are
    /// self-contained.
    pub fn request_with_paging(
        &self,
        url: Url,
        params: Params,
    ) -> impl Stream<Item = Result<Value>> + Send + 'static {
        let client = self.clone();
        try_stream! {
            let mut next = Some(url);
            let mut params = params;
            while let Some(url) = next.take() {
                let mut payload = client.request(&url, &params).await?;
                for item in take_data(&mut payload)? {
                    yield item;
                }
                next = next_page(&payload)?;
                params = Params::new();
            }
        }
    }

    fn paged(&self, path: String, params: Params) -> impl Stream<Item = Result<Value>> + Send + 'static {
        let client = self.clone();
        try_stream! {
            let url = client.endpoint(&path)?;
            for await item in client.request_with_paging(url, params) {
                yield item?;
            }
        }
    }

    pub fn accounts(&self, access_token: &str) -> impl Stream<Item = Result<Value>> + Send + 'static {
        self.paged("me/accounts".to_string(), token_params(access_token))
    }

    #[tracing::instrument(level = "debug", skip(self, access_token))]
    pub async fn page(&self, page_id: &str, access_token: &str) -> Result<Value> {
        let url = self.endpoint(page_id)?;
        self.request(&url, &token_params(access_token)).await
    }

    pub fn published_posts(
        &self,
        page_id: &str,
        access_token: &str,
    ) -> impl Stream<Item = Result<Value>> + Send + 'static {
        self.paged(
            format!("{page_id}/published_posts"),
            token_params(access_token),
        )
    }

    #[tracing::instrument(level = "debug", skip(self, access_token))]
    pub async fn post(&self, page_id: &str, post_id: &str, access_token: &str) -> Result<Value> {
        let url = self.endpoint(&format!("{page_id}_{post_id}"))?;
        self.request(&url, &token_params(access_token)).await
    }

    pub fn post_attachments(
        &self,
        page_id: &str,
        post_id: &str,
        access_token: &str,
    ) -> impl Stream<Item = Result<Value>> + Send + 'static {
        self.paged(
            format!("{page_id}_{post_id}/attachments"),
            token_params(access_token),
        )
    }

    /// Insight series of a page (`object_id = page_id`) or a post
    /// (`object_id = {page_id}_{post_id}`).
    pub fn insights(
        &self,
        object_id: &str,
        access_token: &str,
        query: &InsightQuery,
    ) -> impl Stream<Item = Result<Value>> + Send + 'static {
        let mut params = token_params(access_token);
        params.push(("metric".to_string(), query.metric.clone()));
        params.push(("period".to_string(), query.period.as_str().to_string()));
        if let Some(since) = query.since {
            params.push(("since".to_string(), since.format("%Y-%m-%d").to_string()));
        }
        self.paged(format!("{object_id}/insights"), params)
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn token_params(access_token: &str) -> Params {
    vec![("access_token".to_string(), access_token.to_string())]
}

fn next_page(payload: &Value) -> Result<Option<Url>> {
    match payload
        .get("paging")
        .and_then(|p| p.get("next"))
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
    {
        Some(next) => Url::parse(next)
            .map(Some)
            .map_err(|e| Error::payload(format!("paging.next is not a url: {e}"))),
        None => Ok(None),
    }
}

fn take_data(payload: &mut Value) -> Result<Vec<Value>> {
    match payload.get_mut("data").map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(Value::Null) | None => Err(Error::payload("paged response without data array")),
        Some(other) => Err(Error::payload(format!(
            "paged response data is not an array: {other}"
        ))),
    }
}
