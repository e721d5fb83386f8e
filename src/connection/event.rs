// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Transport notifications and session events.
//!
//! Transports never call back into the manager directly. Every socket or
//! protocol notification is posted as a [`TransportEvent`] through an
//! [`EventSink`] and applied by the manager's single dispatch task, so state
//! transitions never run re-entrantly.
//!
//! Consumers of the link observe it through the [`SessionEventBus`].

use tokio::sync::{broadcast, mpsc};

use super::readiness::SocketId;
use super::transport::InboundMessage;

/// Default channel capacity for the session event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A notification raised by a transport link.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The socket is open; watch it for readability.
    SocketOpened,
    /// The socket closed or failed.
    SocketClosed {
        /// Human-readable cause.
        reason: String,
    },
    /// Outbound bytes are queued; watch the socket for writability.
    WritePending,
    /// The outbound queue is drained.
    WriteDrained,
    /// The protocol handshake finished.
    ConnAck {
        /// Whether the broker accepted the session.
        accepted: bool,
        /// Broker return code.
        code: String,
    },
    /// A message arrived on a subscribed topic.
    Message(InboundMessage),
}

/// Handle a transport link uses to post events to its manager.
///
/// Every event is tagged with the socket it belongs to so the manager can
/// ignore late events from a link it already replaced.
#[derive(Debug, Clone)]
pub struct EventSink {
    socket: SocketId,
    tx: mpsc::UnboundedSender<(SocketId, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(
        socket: SocketId,
        tx: mpsc::UnboundedSender<(SocketId, TransportEvent)>,
    ) -> Self {
        Self { socket, tx }
    }

    /// Returns the socket this sink reports for.
    #[must_use]
    pub fn socket(&self) -> SocketId {
        self.socket
    }

    /// Posts an event. Never blocks; events are dropped once the manager is gone.
    pub fn emit(&self, event: TransportEvent) {
        if self.tx.send((self.socket, event)).is_err() {
            tracing::trace!(socket = %self.socket, "Manager gone, dropping transport event");
        }
    }
}

/// An event observed on the broker session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The handshake completed.
    Connected,
    /// The link went down.
    Disconnected,
    /// A message arrived on the command topic.
    Message(InboundMessage),
}

/// Broadcast bus for session events.
///
/// Each subscriber gets its own copy of every event published after it
/// subscribed. A subscriber that falls more than the channel capacity behind
/// loses the oldest events (`RecvError::Lagged`).
#[derive(Debug, Clone)]
pub struct SessionEventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEventBus {
    /// Creates a new bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a new bus with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publishes an event; silently discarded without subscribers.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}
