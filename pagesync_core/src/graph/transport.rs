use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;

/// Query parameters of one Graph request.
pub type Params = Vec<(String, String)>;

/// A single HTTP GET returning a JSON object.
///
/// Implementations surface every network, status and decoding failure as a
/// transient [`Error`] so the client can retry it.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url, params: &Params) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[tracing::instrument(level = "debug")]
    pub fn new(timeout: Duration, pool_size: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pagesync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .pool_max_idle_per_host(pool_size)
            .build()
            .map_err(|e| Error::backend("build graph http client", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(level = "debug", skip(self, params), fields(url = %url.path()))]
    async fn get(&self, url: &Url, params: &Params) -> Result<Value> {
        let resp = self.client.get(url.clone()).query(params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                url: url.path().to_string(),
            });
        }
        Ok(resp.json::<Value>().await?)
    }
}
