// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridge configuration.

use std::time::Duration;

use rumqttc::QoS;

use crate::connection::{
    ConnectionConfig, DEFAULT_RECONNECT_INTERVAL, ManagerSettings, TlsOptions,
};
use crate::sync::{DEFAULT_DRAIN_PAUSE, DEFAULT_QUEUE_CAPACITY};
use crate::version::CURRENT_VERSION;
use crate::web::WebClient;

/// Default prefix of the command topic.
pub const DEFAULT_COMMAND_TOPIC_PREFIX: &str = "ha2xiaodu/command";
/// Default prefix of the report topic.
pub const DEFAULT_REPORT_TOPIC_PREFIX: &str = "ha2xiaodu/report";

/// How state reports reach the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportChannel {
    /// POST to the REST API.
    #[default]
    Http,
    /// Publish on the report topic.
    Mqtt,
}

/// Tunables of a [`BridgeService`](crate::BridgeService).
///
/// Everything except the credential token lives here. The defaults match the
/// production backend.
///
/// # Examples
///
/// ```
/// use duer_bridge::{BridgeConfig, ReportChannel};
/// use std::time::Duration;
///
/// let config = BridgeConfig::default()
///     .with_report_channel(ReportChannel::Mqtt)
///     .with_reconnect_interval(Duration::from_secs(30));
///
/// assert_eq!(config.command_topic("alice"), "ha2xiaodu/command/alice");
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    command_topic_prefix: String,
    report_topic_prefix: String,
    report_channel: ReportChannel,
    reconnect_interval: Duration,
    drain_pause: Duration,
    housekeeping_interval: Duration,
    connect_timeout: Duration,
    keep_alive: Duration,
    http_timeout: Duration,
    queue_capacity: usize,
    plugin_version: String,
    command_qos: QoS,
    tls: TlsOptions,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command_topic_prefix: DEFAULT_COMMAND_TOPIC_PREFIX.to_string(),
            report_topic_prefix: DEFAULT_REPORT_TOPIC_PREFIX.to_string(),
            report_channel: ReportChannel::default(),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            drain_pause: DEFAULT_DRAIN_PAUSE,
            housekeeping_interval: ManagerSettings::DEFAULT_HOUSEKEEPING_INTERVAL,
            connect_timeout: ConnectionConfig::DEFAULT_CONNECT_TIMEOUT,
            keep_alive: ConnectionConfig::DEFAULT_KEEP_ALIVE,
            http_timeout: WebClient::DEFAULT_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            plugin_version: CURRENT_VERSION.to_string(),
            command_qos: QoS::AtLeastOnce,
            tls: TlsOptions::default(),
        }
    }
}

impl BridgeConfig {
    /// Sets the command topic prefix.
    #[must_use]
    pub fn with_command_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.command_topic_prefix = prefix.into();
        self
    }

    /// Sets the report topic prefix.
    #[must_use]
    pub fn with_report_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.report_topic_prefix = prefix.into();
        self
    }

    /// Selects how state reports are delivered (default: HTTP).
    #[must_use]
    pub fn with_report_channel(mut self, channel: ReportChannel) -> Self {
        self.report_channel = channel;
        self
    }

    /// Sets the time between reconnect checks (default: 60 seconds).
    #[must_use]
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Sets the pause after each queued delivery (default: 10 ms).
    #[must_use]
    pub fn with_drain_pause(mut self, pause: Duration) -> Self {
        self.drain_pause = pause;
        self
    }

    /// Sets the link housekeeping period (default: 1 second).
    #[must_use]
    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    /// Sets the handshake timeout (default: 10 seconds).
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the MQTT keep-alive (default: 60 seconds, minimum 1 second).
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the REST request timeout (default: 10 seconds).
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the state sync queue capacity (default: 3000).
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Overrides the version reported to the version gate.
    #[must_use]
    pub fn with_plugin_version(mut self, version: impl Into<String>) -> Self {
        self.plugin_version = version.into();
        self
    }

    /// Sets the command subscription QoS (default: at least once).
    #[must_use]
    pub fn with_command_qos(mut self, qos: QoS) -> Self {
        self.command_qos = qos;
        self
    }

    /// Sets broker TLS options (default: plain TCP).
    #[must_use]
    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    /// Returns the command topic for an account.
    #[must_use]
    pub fn command_topic(&self, username: &str) -> String {
        format!("{}/{username}", self.command_topic_prefix)
    }

    /// Returns the report topic for an account.
    #[must_use]
    pub fn report_topic(&self, username: &str) -> String {
        format!("{}/{username}", self.report_topic_prefix)
    }

    /// Returns the report channel.
    #[must_use]
    pub fn report_channel(&self) -> ReportChannel {
        self.report_channel
    }

    /// Returns the reconnect interval.
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    /// Returns the drain pause.
    #[must_use]
    pub fn drain_pause(&self) -> Duration {
        self.drain_pause
    }

    /// Returns the housekeeping period.
    #[must_use]
    pub fn housekeeping_interval(&self) -> Duration {
        self.housekeeping_interval
    }

    /// Returns the handshake timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the keep-alive.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Returns the REST request timeout.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout
    }

    /// Returns the queue capacity.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Returns the version checked by the version gate.
    #[must_use]
    pub fn plugin_version(&self) -> &str {
        &self.plugin_version
    }

    /// Returns the command subscription QoS.
    #[must_use]
    pub fn command_qos(&self) -> QoS {
        self.command_qos
    }

    /// Returns the TLS options.
    #[must_use]
    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.report_channel(), ReportChannel::Http);
        assert_eq!(config.reconnect_interval(), Duration::from_secs(60));
        assert_eq!(config.drain_pause(), Duration::from_millis(10));
        assert_eq!(config.queue_capacity(), 3000);
        assert_eq!(config.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.plugin_version(), "2024.7.8");
        assert_eq!(config.command_qos(), QoS::AtLeastOnce);
        assert!(!config.tls().is_enabled());
    }

    #[test]
    fn topics_use_prefixes() {
        let config = BridgeConfig::default().with_report_topic_prefix("custom/report");
        assert_eq!(config.command_topic("bob"), "ha2xiaodu/command/bob");
        assert_eq!(config.report_topic("bob"), "custom/report/bob");
    }
}
