use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use datasync_core::RunContext;

use crate::error::{FetchError, Result};
use crate::fetcher::{ByteStream, Fetcher};

/// Chunk size used when replaying a stored body.
const CHUNK_SIZE: usize = 8 * 1024;

/// Serves fixed bodies from memory, keyed by URL.
///
/// Used for dry runs and tests; unknown URLs fail with [`FetchError::NotFound`].
#[derive(Default)]
pub struct MemoryFetcher {
    bodies: RwLock<HashMap<String, Bytes>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, body: impl Into<Bytes>) {
        self.bodies
            .write()
            .expect("memory fetcher poisoned")
            .insert(url.to_string(), body.into());
    }

    pub fn with(self, url: &str, body: impl Into<Bytes>) -> Self {
        self.insert(url, body);
        self
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn download(&self, ctx: &RunContext, url: &str) -> Result<ByteStream> {
        ctx.check()?;
        let body = self
            .bodies
            .read()
            .expect("memory fetcher poisoned")
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))?;

        let chunks: Vec<Result<Bytes>> = (0..body.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(body.slice(start..(start + CHUNK_SIZE).min(body.len()))))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn download_streams_whole_body() {
        let body = vec![7u8; CHUNK_SIZE * 2 + 5];
        let fetcher = MemoryFetcher::new().with("mem://big", body.clone());
        let mut stream = fetcher
            .download(&RunContext::new(), "mem://big")
            .await
            .unwrap();
        let mut got = Vec::new();
        let mut chunks = 0;
        while let Some(chunk) = stream.next().await {
            got.extend_from_slice(&chunk.unwrap());
            chunks += 1;
        }
        assert_eq!(got, body);
        assert_eq!(chunks, 3);
    }

    #[tokio::test]
    async fn unknown_url_is_not_found() {
        let fetcher = MemoryFetcher::new();
        let err = fetcher
            .download(&RunContext::new(), "mem://missing")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FetchError::NotFound(_)));
    }

    #[tokio::test]
    async fn download_to_file_writes_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.json");
        let fetcher = MemoryFetcher::new().with("mem://a", "[1,2,3]");
        let n = fetcher
            .download_to_file(&RunContext::new(), "mem://a", &path)
            .await
            .unwrap();
        assert_eq!(n, 7);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1,2,3]");
    }

    #[tokio::test]
    async fn cancelled_context_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let fetcher = MemoryFetcher::new().with("mem://a", "[]");
        let ctx = RunContext::new();
        ctx.cancel();
        let err = fetcher
            .download_to_file(&ctx, "mem://a", &path)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Context(_)));
        assert!(!path.exists());
    }
}
