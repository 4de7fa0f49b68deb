//! `datasync-fetch`: the download capability handed to every job.

pub mod error;
pub mod fetcher;
pub mod http;
pub mod memory;

pub use error::{FetchError, Result};
pub use fetcher::{ByteStream, Fetcher};
pub use http::HttpFetcher;
pub use memory::MemoryFetcher;
