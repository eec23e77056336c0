//! Remote base fetching over HTTP(S)

use overpack_core::error::CoreError;
use overpack_core::fs::RemoteFetcher;

/// Whether a resource entry is a remote reference rather than a local path.
pub fn is_remote_ref(entry: &str) -> bool {
    url::Url::parse(entry)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Fetches remote bases with a blocking HTTP client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> overpack_core::Result<Vec<u8>> {
        let fail = |message: String| CoreError::RemoteFetch {
            url: url.to_string(),
            message,
        };
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| fail(e.to_string()))?
            .error_for_status()
            .map_err(|e| fail(e.to_string()))?;
        let body = response.bytes().map_err(|e| fail(e.to_string()))?;
        Ok(body.to_vec())
    }
}
