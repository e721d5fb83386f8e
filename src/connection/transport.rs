// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport seam between the connection manager and a network client.

use std::future::Future;

use rumqttc::QoS;

use super::config::ConnectionConfig;
use super::event::EventSink;
use crate::error::{ConnectError, ProtocolError};

/// A message to hand to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Raw payload, usually JSON.
    pub payload: Vec<u8>,
    /// Quality of service.
    pub qos: QoS,
    /// Whether the broker should retain the message.
    pub retain: bool,
}

impl OutboundMessage {
    /// Creates an at-most-once, non-retained message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    /// Sets the quality of service.
    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Marks the message as retained.
    #[must_use]
    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }
}

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Creates an inbound message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Returns the payload as UTF-8, lossily.
    #[must_use]
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Factory for broker links.
///
/// `open` performs whatever is needed to start a session and returns as soon
/// as a link exists; handshake progress is reported through the
/// [`EventSink`]. Any blocking work must be moved off the runtime.
pub trait Transport: Send + Sync + 'static {
    /// The live link type.
    type Link: Link;

    /// Starts a new session.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the link cannot be created at all.
    fn open(
        &self,
        config: &ConnectionConfig,
        events: EventSink,
    ) -> impl Future<Output = Result<Self::Link, ConnectError>> + Send;
}

/// A live broker link. All methods are non-blocking.
pub trait Link: Send + Sync + 'static {
    /// Queues a message for publication.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the request cannot be queued.
    fn publish(&self, message: OutboundMessage) -> Result<(), ProtocolError>;

    /// Queues a subscription request.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the request cannot be queued.
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError>;

    /// Runs periodic protocol bookkeeping; returns `false` once the link is unhealthy.
    fn housekeeping(&self) -> bool;

    /// Drops the socket without a clean protocol disconnect.
    fn close(&self);
}
