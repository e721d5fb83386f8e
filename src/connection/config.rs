// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker connection configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConnectError;

/// Payload of the retained last-will message.
pub const LAST_WILL_PAYLOAD: &str = r#"{"connected":false}"#;

/// TLS settings for the broker connection.
///
/// # Examples
///
/// ```
/// use duer_bridge::connection::TlsOptions;
///
/// let tls = TlsOptions::enabled()
///     .with_ca_path("/etc/ssl/broker-ca.pem")
///     .with_client_auth("/etc/ssl/client.pem", "/etc/ssl/client.key");
/// assert!(tls.is_enabled());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    enabled: bool,
    ca_path: Option<PathBuf>,
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    ciphers: Option<String>,
    insecure: bool,
}

impl TlsOptions {
    /// Returns TLS options with TLS turned on.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Sets the CA bundle used to verify the broker.
    #[must_use]
    pub fn with_ca_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    /// Sets the client certificate and key for mutual TLS.
    #[must_use]
    pub fn with_client_auth(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.cert_path = Some(cert.into());
        self.key_path = Some(key.into());
        self
    }

    /// Sets an explicit cipher list.
    #[must_use]
    pub fn with_ciphers(mut self, ciphers: impl Into<String>) -> Self {
        self.ciphers = Some(ciphers.into());
        self
    }

    /// Skips broker hostname verification.
    #[must_use]
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Returns whether TLS is turned on.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the CA bundle path.
    #[must_use]
    pub fn ca_path(&self) -> Option<&Path> {
        self.ca_path.as_deref()
    }

    /// Returns the client certificate path.
    #[must_use]
    pub fn cert_path(&self) -> Option<&Path> {
        self.cert_path.as_deref()
    }

    /// Returns the client key path.
    #[must_use]
    pub fn key_path(&self) -> Option<&Path> {
        self.key_path.as_deref()
    }

    /// Returns the cipher list.
    #[must_use]
    pub fn ciphers(&self) -> Option<&str> {
        self.ciphers.as_deref()
    }

    /// Returns whether hostname verification is skipped.
    #[must_use]
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }
}

/// Immutable parameters for one broker connection.
///
/// Built once per service start with [`ConnectionConfig::builder`].
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    host: String,
    port: u16,
    client_id: String,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connect_timeout: Duration,
    tls: TlsOptions,
}

impl ConnectionConfig {
    /// Default broker port.
    pub const DEFAULT_PORT: u16 = 1883;
    /// Default keep-alive interval.
    pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);
    /// Default handshake timeout.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Returns the broker host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the MQTT client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the username and password, if set.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.credentials
            .as_ref()
            .map(|(u, p)| (u.as_str(), p.as_str()))
    }

    /// Returns the keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns the handshake timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the TLS options.
    #[must_use]
    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }

    /// Returns the topic the retained last-will message is published on.
    #[must_use]
    pub fn last_will_topic(&self) -> String {
        format!("{}/state", self.client_id)
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("has_credentials", &self.credentials.is_some())
            .field("keep_alive", &self.keep_alive)
            .field("connect_timeout", &self.connect_timeout)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Builder for [`ConnectionConfig`].
///
/// # Examples
///
/// ```
/// use duer_bridge::connection::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::builder()
///     .host("192.168.1.50")
///     .port(1883)
///     .client_id("bridge")
///     .credentials("user", "password")
///     .keep_alive(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(config.last_will_topic(), "bridge/state");
/// ```
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<String>,
    credentials: Option<(String, String)>,
    keep_alive: Option<Duration>,
    connect_timeout: Option<Duration>,
    tls: TlsOptions,
}

impl ConnectionConfigBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the client identifier (default: a random `duer_` identifier).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 60 seconds).
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Sets the handshake timeout (default: 10 seconds).
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the TLS options.
    #[must_use]
    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidConfig`] if the host is missing or the
    /// keep-alive interval is shorter than one second.
    pub fn build(self) -> Result<ConnectionConfig, ConnectError> {
        let host = self
            .host
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConnectError::InvalidConfig("broker host is required".to_string()))?;

        let keep_alive = self.keep_alive.unwrap_or(ConnectionConfig::DEFAULT_KEEP_ALIVE);
        if keep_alive < Duration::from_secs(1) {
            return Err(ConnectError::InvalidConfig(
                "keep-alive must be at least one second".to_string(),
            ));
        }

        let client_id = self
            .client_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("duer_{}", uuid::Uuid::new_v4().simple()));

        Ok(ConnectionConfig {
            host,
            port: self.port.unwrap_or(ConnectionConfig::DEFAULT_PORT),
            client_id,
            credentials: self.credentials,
            keep_alive,
            connect_timeout: self
                .connect_timeout
                .unwrap_or(ConnectionConfig::DEFAULT_CONNECT_TIMEOUT),
            tls: self.tls,
        })
    }
}
