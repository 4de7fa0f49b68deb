use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use datasync_core::RunContext;
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::Result;

/// Body of a download, yielded chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Common interface for anything that can retrieve a source by URL.
///
/// Implementations must be `Send + Sync`: one fetcher is shared by every job
/// running in an orchestration pass.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Start a download and return its body as a stream.
    ///
    /// The request itself observes `ctx`; consumers of the stream are
    /// expected to keep polling `ctx` while they drain it.
    async fn download(&self, ctx: &RunContext, url: &str) -> Result<ByteStream>;

    /// Stream `url` into `path`, returning the number of bytes written.
    ///
    /// Cancellation is checked between chunks. On any failure the partial
    /// file is removed so a later run never parses a truncated download.
    async fn download_to_file(&self, ctx: &RunContext, url: &str, path: &Path) -> Result<u64> {
        let mut stream = self.download(ctx, url).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;

        let result: Result<u64> = async {
            let mut written = 0u64;
            while let Some(chunk) = ctx.run(stream.next()).await? {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(written)
        }
        .await;

        match &result {
            Ok(bytes) => debug!(%url, path = %path.display(), bytes, "download saved"),
            Err(e) => {
                warn!(%url, path = %path.display(), error = %e, "download failed, removing partial file");
                drop(file);
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        result
    }
}
