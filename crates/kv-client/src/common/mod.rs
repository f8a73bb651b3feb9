//! Common utilities for the coordination store client
//!
//! Provides the HTTP plumbing shared by every gateway call.

pub mod wire;

use crate::error::StoreError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// HTTP client wrapper with endpoint failover
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    endpoints: Vec<String>,
    /// Index of the endpoint that answered last
    preferred: AtomicUsize,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, endpoints: Vec<String>) -> Result<Self, StoreError> {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|e| e.trim().trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(StoreError::InvalidConfig("at least one endpoint is required".to_string()));
        }
        Ok(Self {
            client,
            endpoints,
            preferred: AtomicUsize::new(0),
        })
    }

    /// Configured endpoints
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// POST a JSON body to `path`, trying each endpoint until one answers.
    ///
    /// Connection failures move on to the next endpoint; an HTTP error status
    /// from a reachable endpoint is returned as-is.
    pub async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        let start = self.preferred.load(Ordering::Relaxed);
        let mut last_error = None;

        for offset in 0..self.endpoints.len() {
            let index = (start + offset) % self.endpoints.len();
            let url = format!("{}{}", self.endpoints[index], path);
            debug!("POST {}", url);

            let response = match self.client.post(&url).json(body).send().await {
                Ok(response) => response,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    warn!("Store endpoint {} unreachable: {}", self.endpoints[index], e);
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(StoreError::Http(e)),
            };
            self.preferred.store(index, Ordering::Relaxed);

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(StoreError::Api(format!("POST {} failed: {} - {}", path, status, body)));
            }

            let text = response.text().await?;
            return serde_json::from_str(&text).map_err(|e| {
                StoreError::Api(format!(
                    "error decoding response body: {} - Response (first 500 chars): {}",
                    e,
                    text.chars().take(500).collect::<String>()
                ))
            });
        }

        Err(StoreError::Unavailable(match last_error {
            Some(e) => e.to_string(),
            None => "no endpoint answered".to_string(),
        }))
    }
}

/// Base64-encode a key or value for the gateway
pub fn encode(raw: &[u8]) -> String {
    STANDARD.encode(raw)
}

/// Decode a base64 gateway field into UTF-8
pub fn decode(encoded: &str) -> Result<String, StoreError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| StoreError::Encoding(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| StoreError::Encoding(e.to_string()))
}
