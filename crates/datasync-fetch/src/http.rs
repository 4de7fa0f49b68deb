use std::time::Duration;

use async_trait::async_trait;
use datasync_core::{config::FetchConfig, RunContext};
use futures_util::StreamExt;
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::fetcher::{ByteStream, Fetcher};

/// reqwest-backed fetcher shared by all jobs in a run.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_config(cfg: &FetchConfig) -> Result<Self> {
        Self::new(&cfg.user_agent, Duration::from_secs(cfg.timeout_secs))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn download(&self, ctx: &RunContext, url: &str) -> Result<ByteStream> {
        let resp = ctx.run(self.client.get(url).send()).await??;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        debug!(%url, status = status.as_u16(), len = ?resp.content_length(), "download started");

        Ok(Box::pin(
            resp.bytes_stream().map(|chunk| chunk.map_err(FetchError::from)),
        ))
    }
}
