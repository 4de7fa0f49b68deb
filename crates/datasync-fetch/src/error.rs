use datasync_core::ContextError;
use thiserror::Error;

/// Errors raised while downloading a source file.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP client failed (connect, TLS, body read, client timeout).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("GET {url} returned status {status}")]
    Status { status: u16, url: String },

    /// No source is registered for the URL (in-memory fetcher only).
    #[error("no such source: {0}")]
    NotFound(String),

    /// Writing the downloaded body to disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Context(#[from] ContextError),
}

pub type Result<T> = std::result::Result<T, FetchError>;
