//! HTTP client for the session store API
//!
//! Fetches session snapshots (metadata plus the confirmed event log) over
//! the store's REST surface. The live push stream is not handled here; see
//! [`crate::channel`].

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::types::SessionSnapshot;

/// HTTP client for the session store's REST endpoints.
pub struct SessionClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl SessionClient {
    /// Create a client from configuration.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config.base_url.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a session snapshot: status, metadata, and the full confirmed
    /// event log in server order.
    pub async fn fetch_session(&self, session_id: &str) -> Result<SessionSnapshot> {
        let url = format!(
            "{}/api/sessions/{}",
            self.base_url,
            urlencoding::encode(session_id)
        );

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Api(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let snapshot: SessionSnapshot = response
                .json()
                .await
                .map_err(|e| Error::Api(format!("failed to parse session response: {}", e)))?;
            Ok(snapshot)
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(Error::SessionNotFound(session_id.to_string()))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::Api(format!("API error ({}): {}", status, error_text)))
        }
    }

    /// Check whether the session store is reachable.
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);

        match self.http_client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}
