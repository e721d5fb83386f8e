// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! rumqttc-backed transport.
//!
//! Each link owns one `rumqttc` event loop polled by a driver task. The
//! driver translates what it sees into [`TransportEvent`]s and stops at the
//! first connection error instead of letting rumqttc reconnect on its own;
//! reconnection is the supervisor's job.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet,
    QoS, TlsConfiguration,
};
use tokio::task::JoinHandle;

use super::config::{ConnectionConfig, LAST_WILL_PAYLOAD, TlsOptions};
use super::event::{EventSink, TransportEvent};
use super::transport::{InboundMessage, Link, OutboundMessage, Transport};
use crate::error::{ConnectError, ProtocolError};

/// Transport that opens links with `rumqttc`.
#[derive(Debug, Clone)]
pub struct RumqttTransport {
    request_capacity: usize,
}

impl RumqttTransport {
    /// Default capacity of the client request channel.
    pub const DEFAULT_REQUEST_CAPACITY: usize = 10;

    /// Creates a transport with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_capacity: Self::DEFAULT_REQUEST_CAPACITY,
        }
    }

    /// Sets the capacity of the client request channel.
    #[must_use]
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity.max(1);
        self
    }
}

impl Default for RumqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for RumqttTransport {
    type Link = RumqttLink;

    async fn open(
        &self,
        config: &ConnectionConfig,
        events: EventSink,
    ) -> Result<RumqttLink, ConnectError> {
        let options = build_options(config).await?;
        let (client, event_loop) = AsyncClient::new(options, self.request_capacity);
        let pending = Arc::new(AtomicUsize::new(0));

        tracing::debug!(
            host = %config.host(),
            port = config.port(),
            client_id = %config.client_id(),
            socket = %events.socket(),
            "Starting MQTT event loop"
        );

        let driver = tokio::spawn(drive(event_loop, events.clone(), Arc::clone(&pending)));

        Ok(RumqttLink {
            client,
            pending,
            events,
            driver,
        })
    }
}

/// A live `rumqttc` link.
#[derive(Debug)]
pub struct RumqttLink {
    client: AsyncClient,
    /// Requests handed to the client and not yet written to the socket.
    pending: Arc<AtomicUsize>,
    events: EventSink,
    driver: JoinHandle<()>,
}

impl RumqttLink {
    fn begin_request(&self) {
        if self.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            self.events.emit(TransportEvent::WritePending);
        }
    }

    fn abandon_request(&self) {
        if release(&self.pending) {
            self.events.emit(TransportEvent::WriteDrained);
        }
    }
}

impl Link for RumqttLink {
    fn publish(&self, message: OutboundMessage) -> Result<(), ProtocolError> {
        tracing::debug!(topic = %message.topic, bytes = message.payload.len(), "Publishing MQTT message");
        self.begin_request();
        self.client
            .try_publish(message.topic, message.qos, message.retain, message.payload)
            .inspect_err(|_| self.abandon_request())
            .map_err(ProtocolError::Mqtt)
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError> {
        tracing::debug!(topic = %topic, ?qos, "Subscribing to MQTT topic");
        self.begin_request();
        self.client
            .try_subscribe(topic, qos)
            .inspect_err(|_| self.abandon_request())
            .map_err(ProtocolError::Mqtt)
    }

    fn housekeeping(&self) -> bool {
        // rumqttc schedules PINGREQ inside `poll`; a finished driver means the
        // keep-alive bookkeeping has stopped with it.
        !self.driver.is_finished()
    }

    fn close(&self) {
        // Dropping the event loop closes the socket without DISCONNECT, so the
        // broker publishes the last will.
        self.driver.abort();
    }
}

impl Drop for RumqttLink {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Decrements the pending counter; returns true when it reached zero.
fn release(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        .is_ok_and(|previous| previous == 1)
}

async fn build_options(config: &ConnectionConfig) -> Result<MqttOptions, ConnectError> {
    let mut options = MqttOptions::new(config.client_id(), config.host(), config.port());
    options.set_keep_alive(config.keep_alive());
    options.set_clean_session(true);

    if let Some((username, password)) = config.credentials() {
        options.set_credentials(username, password);
    }

    options.set_last_will(LastWill::new(
        config.last_will_topic(),
        LAST_WILL_PAYLOAD,
        QoS::AtLeastOnce,
        true,
    ));

    if config.tls().is_enabled() {
        let tls = config.tls().clone();
        let tls_config = tokio::task::spawn_blocking(move || load_tls(&tls))
            .await
            .map_err(|e| ConnectError::Transport(format!("TLS loader task failed: {e}")))??;
        options.set_transport(rumqttc::Transport::Tls(tls_config));
    }

    Ok(options)
}

/// Reads TLS material from disk. Blocking; run on the blocking pool.
fn load_tls(tls: &TlsOptions) -> Result<TlsConfiguration, ConnectError> {
    if let Some(ciphers) = tls.ciphers() {
        tracing::warn!(ciphers = %ciphers, "Custom cipher lists are not supported by the rustls backend, using defaults");
    }
    if tls.is_insecure() {
        tracing::warn!("Insecure TLS requested but not supported by the rustls backend, verifying broker certificate");
    }

    let ca_path = tls.ca_path().ok_or_else(|| {
        ConnectError::InvalidConfig("TLS requires a CA bundle path".to_string())
    })?;
    let ca = std::fs::read(ca_path)?;

    let client_auth = match (tls.cert_path(), tls.key_path()) {
        (Some(cert), Some(key)) => Some((std::fs::read(cert)?, std::fs::read(key)?)),
        (None, None) => None,
        _ => {
            return Err(ConnectError::InvalidConfig(
                "client certificate and key must be set together".to_string(),
            ));
        }
    };

    Ok(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    })
}

/// Polls the event loop until the connection ends.
async fn drive(mut event_loop: EventLoop, events: EventSink, pending: Arc<AtomicUsize>) {
    let mut opened = false;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                if !opened {
                    opened = true;
                    events.emit(TransportEvent::SocketOpened);
                }
                let accepted = connack.code == ConnectReturnCode::Success;
                events.emit(TransportEvent::ConnAck {
                    accepted,
                    code: format!("{:?}", connack.code),
                });
                if !accepted {
                    events.emit(TransportEvent::SocketClosed {
                        reason: format!("broker refused connection: {:?}", connack.code),
                    });
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(topic = %publish.topic, "MQTT message received");
                events.emit(TransportEvent::Message(InboundMessage::new(
                    publish.topic,
                    publish.payload.to_vec(),
                )));
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                events.emit(TransportEvent::SocketClosed {
                    reason: "broker sent DISCONNECT".to_string(),
                });
                break;
            }
            Ok(Event::Outgoing(Outgoing::Publish(_) | Outgoing::Subscribe(_))) => {
                if release(&pending) {
                    events.emit(TransportEvent::WriteDrained);
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                events.emit(TransportEvent::SocketClosed {
                    reason: "client sent DISCONNECT".to_string(),
                });
                break;
            }
            Ok(_) => {}
            Err(e) => {
                events.emit(TransportEvent::SocketClosed {
                    reason: e.to_string(),
                });
                break;
            }
        }
    }

    tracing::debug!(socket = %events.socket(), "MQTT event loop finished");
}
