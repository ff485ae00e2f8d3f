//! Weight file fetching
//!
//! The cache only needs "put the bytes behind this URL at this path"; the
//! HTTP implementation sits behind the `remote` feature.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Why a single download attempt failed
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("downloads not compiled in (build with --features remote)")]
    Unsupported,
}

/// Something that can download a URL into a local file
pub trait WeightFetcher: Send + Sync {
    /// Write the body behind `url` to `dest`, replacing any existing file.
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Blocking HTTP fetcher with a per-download timeout
pub struct HttpFetcher {
    timeout: Duration,
    #[cfg(feature = "remote")]
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    #[cfg(feature = "remote")]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("revivia/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self { timeout, client }
    }

    #[cfg(not(feature = "remote"))]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(feature = "remote")]
impl WeightFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Transport(e.to_string())
            }
        };

        let mut response = self.client.get(url).send().map_err(classify)?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let mut file = std::fs::File::create(dest)?;
        response.copy_to(&mut file).map_err(classify)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(not(feature = "remote"))]
impl WeightFetcher for HttpFetcher {
    fn fetch(&self, _url: &str, _dest: &Path) -> Result<(), FetchError> {
        Err(FetchError::Unsupported)
    }
}
