//! Shared plumbing for HTTP embedding providers.

use std::time::Duration;

use serde::de::DeserializeOwned;

use rag_core::{RagError, Result};

/// Build a client with a per-request timeout.
pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::config(format!("Failed to build HTTP client: {}", e)))
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Map a transport failure (DNS, connect, timeout) to a connection error.
pub(crate) fn transport_error(url: &str, err: reqwest::Error) -> RagError {
    RagError::connection(format!("Request to {} failed: {}", url, err))
}

/// Decode a JSON body, turning non-success statuses into embedding errors.
pub(crate) async fn read_json<T: DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RagError::embedding(format!(
            "{} returned {}: {}",
            url,
            status,
            body.trim()
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| RagError::embedding(format!("Malformed response from {}: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("http://localhost:11434/", "/api/embed"),
            "http://localhost:11434/api/embed"
        );
        assert_eq!(
            endpoint("https://api.openai.com/v1", "embeddings"),
            "https://api.openai.com/v1/embeddings"
        );
    }

    #[test]
    fn test_build_client() {
        assert!(build_client(5).is_ok());
    }
}
