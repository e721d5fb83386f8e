// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP client for the remote backend's REST API.
//!
//! Every endpoint answers with the same envelope:
//!
//! ```json
//! {"code": 0, "msg": "ok", "data": { ... }}
//! ```
//!
//! A non-zero `code` is treated as a rejection even when the HTTP status is
//! a success.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Path of the plugin configuration endpoint (GET).
pub const PLUGIN_CONFIG_PATH: &str = "/api/plugin/config";
/// Path of the bulk entity sync endpoint (POST).
pub const SYNC_ENTITY_PATH: &str = "/api/device/sync_entity_v1";
/// Path of the single state change endpoint (POST).
pub const CHANGE_STATE_PATH: &str = "/api/device/change_state";

/// Response envelope shared by every endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    /// Zero on success.
    pub code: i64,
    /// Optional human-readable message.
    pub msg: Option<String>,
    /// Endpoint-specific payload.
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Converts a rejected envelope into an error.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Rejected`] if `code` is not zero.
    pub fn into_result(self) -> Result<Option<T>, ProtocolError> {
        if self.code == 0 {
            Ok(self.data)
        } else {
            Err(ProtocolError::Rejected {
                code: self.code,
                message: self.msg.unwrap_or_default(),
            })
        }
    }
}

/// Payload of [`PLUGIN_CONFIG_PATH`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginConfig {
    /// Minimum bridge version the backend accepts.
    pub plugin_version: String,
}

/// Client for the backend REST API.
///
/// # Examples
///
/// ```no_run
/// use duer_bridge::web::WebClient;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), duer_bridge::ProtocolError> {
/// let client = WebClient::new("https://backend.example", Duration::from_secs(10))?;
/// let config = client.plugin_config().await?;
/// println!("required version: {}", config.plugin_version);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct WebClient {
    base_url: String,
    client: Client,
}

impl WebClient {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a client for the given base URL.
    ///
    /// A bare host is given an `http://` scheme. A trailing slash is removed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidAddress`] for an empty URL, or
    /// [`ProtocolError::Http`] if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProtocolError> {
        let base_url = base_url.into();
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidAddress(base_url));
        }
        let base_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProtocolError::Http)?;

        Ok(Self { base_url, client })
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Fetches the plugin configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on transport failure, a non-success status,
    /// a rejected envelope, or a missing `data` object.
    pub async fn plugin_config(&self) -> Result<PluginConfig, ProtocolError> {
        let url = self.url(PLUGIN_CONFIG_PATH);
        tracing::debug!(url = %url, "Fetching plugin config");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(ProtocolError::Http)?;
        let envelope: ApiResponse<PluginConfig> = Self::read_envelope(response).await?;

        envelope.into_result()?.ok_or_else(|| ProtocolError::Rejected {
            code: 0,
            message: "response has no plugin config".to_string(),
        })
    }

    /// POSTs a JSON body and checks the response envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on transport failure, a non-success status,
    /// or a rejected envelope.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ProtocolError> {
        let url = self.url(path);
        tracing::debug!(url = %url, "Posting to backend");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(ProtocolError::Http)?;
        let envelope: ApiResponse<serde_json::Value> = Self::read_envelope(response).await?;
        envelope.into_result().map(|_| ())
    }

    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<ApiResponse<T>, ProtocolError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }
        response.json().await.map_err(ProtocolError::Http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalization() {
        let timeout = WebClient::DEFAULT_TIMEOUT;
        assert_eq!(
            WebClient::new("https://api.test/", timeout).unwrap().base_url(),
            "https://api.test"
        );
        assert_eq!(
            WebClient::new("api.test", timeout).unwrap().base_url(),
            "http://api.test"
        );
        assert!(matches!(
            WebClient::new("  ", timeout),
            Err(ProtocolError::InvalidAddress(_))
        ));
    }

    #[test]
    fn url_joins_path() {
        let client = WebClient::new("http://api.test", WebClient::DEFAULT_TIMEOUT).unwrap();
        assert_eq!(
            client.url(CHANGE_STATE_PATH),
            "http://api.test/api/device/change_state"
        );
    }

    #[test]
    fn envelope_zero_code_is_success() {
        let envelope: ApiResponse<PluginConfig> =
            serde_json::from_str(r#"{"code":0,"data":{"plugin_version":"2024.7.1"}}"#).unwrap();
        let data = envelope.into_result().unwrap().unwrap();
        assert_eq!(data.plugin_version, "2024.7.1");
    }

    #[test]
    fn envelope_nonzero_code_is_rejected() {
        let envelope: ApiResponse<PluginConfig> =
            serde_json::from_str(r#"{"code":401,"msg":"bad secret"}"#).unwrap();
        match envelope.into_result() {
            Err(ProtocolError::Rejected { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "bad secret");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
