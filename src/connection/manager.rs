// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker session manager.
//!
//! [`ConnectionManager`] owns the one logical session to the broker: the
//! current link, its [`ConnectionState`], and the readiness interest held for
//! its socket. Transport notifications are applied by a single dispatch task,
//! so every state transition is serialized:
//!
//! ```text
//! Disconnected --open()--> Connecting --ConnAck--> Connected
//!      ^                                               |
//!      +------------- SocketClosed / close() ----------+
//! ```
//!
//! `Connected` is only reached again through a fresh [`open`](ConnectionManager::open),
//! normally driven by the [`ReconnectSupervisor`](super::ReconnectSupervisor).
//! Every successful `open` re-subscribes the command topic.
//!
//! # Examples
//!
//! ```no_run
//! use duer_bridge::connection::{
//!     ConnectionConfig, ConnectionManager, ManagerSettings, OutboundMessage, RumqttTransport,
//! };
//!
//! # async fn example() -> duer_bridge::Result<()> {
//! let config = ConnectionConfig::builder()
//!     .host("192.168.1.50")
//!     .credentials("user", "password")
//!     .build()?;
//! let settings = ManagerSettings::default().with_command_topic("ha2xiaodu/command/user");
//! let manager = ConnectionManager::new(RumqttTransport::new(), config, settings);
//!
//! manager.open().await?;
//! manager.publish(OutboundMessage::new("ha2xiaodu/report/user", "{}"))?;
//! manager.close();
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::QoS;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::config::ConnectionConfig;
use super::event::{EventSink, SessionEvent, SessionEventBus, TransportEvent};
use super::readiness::{Interest, Readiness, SocketId};
use super::state::ConnectionState;
use super::transport::{Link, OutboundMessage, Transport};
use crate::error::{ConnectError, ProtocolError};

/// Settings for a [`ConnectionManager`] beyond the broker parameters.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    command_topic: Option<String>,
    command_qos: QoS,
    housekeeping_interval: Duration,
}

impl ManagerSettings {
    /// Default housekeeping period.
    pub const DEFAULT_HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

    /// Sets the topic subscribed on every successful handshake.
    #[must_use]
    pub fn with_command_topic(mut self, topic: impl Into<String>) -> Self {
        self.command_topic = Some(topic.into());
        self
    }

    /// Sets the QoS used for the command subscription (default: at least once).
    #[must_use]
    pub fn with_command_qos(mut self, qos: QoS) -> Self {
        self.command_qos = qos;
        self
    }

    /// Sets the housekeeping period (default: 1 second).
    #[must_use]
    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Returns the command topic.
    #[must_use]
    pub fn command_topic(&self) -> Option<&str> {
        self.command_topic.as_deref()
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            command_topic: None,
            command_qos: QoS::AtLeastOnce,
            housekeeping_interval: Self::DEFAULT_HOUSEKEEPING_INTERVAL,
        }
    }
}

/// Owner of the broker session.
///
/// Cheaply cloneable; clones share the same session.
pub struct ConnectionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    settings: ManagerSettings,
    state_tx: watch::Sender<ConnectionState>,
    events: SessionEventBus,
    readiness: Mutex<Readiness>,
    link: Mutex<Option<(SocketId, Arc<T::Link>)>>,
    /// Socket whose events are currently honoured; 0 when none.
    current_socket: AtomicU64,
    next_socket: AtomicU64,
    dispatch_tx: mpsc::UnboundedSender<(SocketId, TransportEvent)>,
    housekeeping: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a manager in the `Disconnected` state.
    ///
    /// Spawns the event dispatch task, so this must be called from within a
    /// Tokio runtime.
    #[must_use]
    pub fn new(transport: T, config: ConnectionConfig, settings: ManagerSettings) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new(Inner {
            transport,
            config,
            settings,
            state_tx,
            events: SessionEventBus::new(),
            readiness: Mutex::new(Readiness::new()),
            link: Mutex::new(None),
            current_socket: AtomicU64::new(0),
            next_socket: AtomicU64::new(0),
            dispatch_tx,
            housekeeping: Mutex::new(None),
            dispatcher: Mutex::new(None),
        });

        let handle = tokio::spawn(dispatch_events(Arc::downgrade(&inner), dispatch_rx));
        *inner.dispatcher.lock() = Some(handle);

        Self { inner }
    }

    /// Returns the broker parameters.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Returns the current link state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Returns a receiver that observes every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribes to session events (connect, disconnect, inbound messages).
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Returns whether the given readiness interest is currently registered.
    #[must_use]
    pub fn has_interest(&self, interest: Interest) -> bool {
        self.inner.readiness.lock().has_interest(interest)
    }

    /// Returns how many times socket interest has been torn down.
    #[must_use]
    pub fn interest_removals(&self) -> u64 {
        self.inner.readiness.lock().removals()
    }

    /// Opens a new session and waits for the handshake outcome.
    ///
    /// Any previous link is closed first.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the transport cannot create a link, the
    /// broker refuses the session, or the handshake does not finish within
    /// the configured connect timeout. The state is `Disconnected` afterwards.
    pub async fn open(&self) -> Result<(), ConnectError> {
        self.close();

        let socket = SocketId::new(self.inner.next_socket.fetch_add(1, Ordering::AcqRel) + 1);
        self.inner
            .current_socket
            .store(socket.value(), Ordering::Release);
        let mut state_rx = self.inner.state_tx.subscribe();
        self.inner.state_tx.send_replace(ConnectionState::Connecting);

        tracing::info!(
            host = %self.inner.config.host(),
            port = self.inner.config.port(),
            socket = %socket,
            "Connecting to MQTT broker"
        );

        let sink = EventSink::new(socket, self.inner.dispatch_tx.clone());
        let link = match self.inner.transport.open(&self.inner.config, sink).await {
            Ok(link) => Arc::new(link),
            Err(e) => {
                self.inner.current_socket.store(0, Ordering::Release);
                self.inner
                    .state_tx
                    .send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        *self.inner.link.lock() = Some((socket, link));

        let timeout = self.inner.config.connect_timeout();
        let outcome = tokio::time::timeout(timeout, async {
            state_rx
                .wait_for(|s| *s != ConnectionState::Connecting)
                .await
                .map(|s| *s)
        })
        .await;

        match outcome {
            Ok(Ok(ConnectionState::Connected)) => {
                self.subscribe_command_topic();
                Ok(())
            }
            Ok(Ok(_)) => {
                self.close();
                Err(ConnectError::Refused(
                    "socket closed during handshake".to_string(),
                ))
            }
            Ok(Err(_)) => Err(ConnectError::Transport(
                "state channel closed".to_string(),
            )),
            Err(_) => {
                self.close();
                Err(ConnectError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    fn subscribe_command_topic(&self) {
        let Some(topic) = self.inner.settings.command_topic() else {
            return;
        };
        match self.subscribe(topic, self.inner.settings.command_qos) {
            Ok(()) => tracing::debug!(topic = %topic, "Subscribed to command topic"),
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "Failed to subscribe to command topic");
            }
        }
    }

    /// Publishes a message if the link is connected.
    ///
    /// Nothing is queued while disconnected: the call is skipped, logged, and
    /// returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the transport refuses the request.
    pub fn publish(&self, message: OutboundMessage) -> Result<bool, ProtocolError> {
        let Some(link) = self.connected_link() else {
            tracing::debug!(topic = %message.topic, "Not connected, skipping publish");
            return Ok(false);
        };
        link.publish(message)?;
        Ok(true)
    }

    /// Subscribes to a topic on the live link.
    ///
    /// Only the command topic from [`ManagerSettings`] is re-issued on reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotConnected`] while disconnected, or the
    /// transport's error if it refuses the request.
    pub fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError> {
        let link = self.connected_link().ok_or(ProtocolError::NotConnected)?;
        link.subscribe(topic, qos)
    }

    /// Drops the current link without a clean disconnect.
    ///
    /// The broker sees the socket vanish and publishes the last will.
    /// Idempotent.
    pub fn close(&self) {
        let Some((socket, link)) = self.inner.link.lock().take() else {
            return;
        };
        link.close();
        self.inner.on_socket_closed(socket, "closed locally");
        self.inner.current_socket.store(0, Ordering::Release);
    }

    fn connected_link(&self) -> Option<Arc<T::Link>> {
        if !self.state().is_connected() {
            return None;
        }
        self.inner
            .link
            .lock()
            .as_ref()
            .map(|(_, link)| Arc::clone(link))
    }

    #[cfg(test)]
    pub(crate) fn handle_event(&self, socket: SocketId, event: TransportEvent) {
        Inner::handle(&self.inner, socket, event);
    }
}

impl<T: Transport> Inner<T> {
    fn handle(this: &Arc<Self>, socket: SocketId, event: TransportEvent) {
        if this.current_socket.load(Ordering::Acquire) != socket.value() {
            tracing::trace!(socket = %socket, ?event, "Ignoring event from stale socket");
            return;
        }

        match event {
            TransportEvent::SocketOpened => {
                if this.readiness.lock().register_read(socket) {
                    tracing::debug!(socket = %socket, "Watching MQTT socket for readability");
                }
                Self::start_housekeeping(this, socket);
            }
            TransportEvent::WritePending => {
                if this.readiness.lock().register_write(socket) {
                    tracing::trace!(socket = %socket, "Watching MQTT socket for writability");
                }
            }
            TransportEvent::WriteDrained => {
                if this.readiness.lock().unregister_write(socket) {
                    tracing::trace!(socket = %socket, "Stopped watching MQTT socket for writability");
                }
            }
            TransportEvent::ConnAck { accepted: true, .. } => this.on_connected(),
            TransportEvent::ConnAck {
                accepted: false,
                code,
            } => {
                tracing::warn!(code = %code, "MQTT broker refused connection");
                this.on_socket_closed(socket, &format!("refused: {code}"));
            }
            TransportEvent::SocketClosed { reason } => this.on_socket_closed(socket, &reason),
            TransportEvent::Message(message) => {
                tracing::debug!(topic = %message.topic, "MQTT message received");
                this.events.publish(SessionEvent::Message(message));
            }
        }
    }

    fn on_connected(&self) {
        let previous = self.state_tx.send_replace(ConnectionState::Connected);
        if previous.is_connected() {
            return;
        }

        tracing::info!(
            host = %self.config.host(),
            port = self.config.port(),
            "Connected to MQTT broker"
        );
        self.events.publish(SessionEvent::Connected);
    }

    fn on_socket_closed(&self, socket: SocketId, reason: &str) {
        let removed = self.readiness.lock().deregister_all(socket);
        if !removed.is_empty() {
            tracing::debug!(socket = %socket, ?removed, "Removed socket interest");
        }

        if let Some(handle) = self.housekeeping.lock().take() {
            handle.abort();
        }

        {
            let mut link = self.link.lock();
            if link.as_ref().is_some_and(|(s, _)| *s == socket) {
                link.take();
            }
        }

        let previous = self.state_tx.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            tracing::warn!(
                host = %self.config.host(),
                port = self.config.port(),
                reason = %reason,
                "Disconnected from MQTT broker"
            );
            if previous.is_connected() {
                self.events.publish(SessionEvent::Disconnected);
            }
        }
    }

    fn start_housekeeping(this: &Arc<Self>, socket: SocketId) {
        let weak = Arc::downgrade(this);
        let period = this.settings.housekeeping_interval;

        let handle = tokio::spawn(async move {
            tracing::debug!(socket = %socket, "MQTT housekeeping started");
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let link = inner
                    .link
                    .lock()
                    .as_ref()
                    .filter(|(s, _)| *s == socket)
                    .map(|(_, link)| Arc::clone(link));
                match link {
                    Some(link) if link.housekeeping() => {}
                    _ => break,
                }
            }
            tracing::debug!(socket = %socket, "MQTT housekeeping finished");
        });

        if let Some(previous) = this.housekeeping.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.housekeeping.get_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
        if let Some((_, link)) = self.link.get_mut().take() {
            link.close();
        }
    }
}

async fn dispatch_events<T: Transport>(
    inner: Weak<Inner<T>>,
    mut rx: mpsc::UnboundedReceiver<(SocketId, TransportEvent)>,
) {
    while let Some((socket, event)) = rx.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        Inner::handle(&inner, socket, event);
    }
}

impl<T: Transport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("host", &self.inner.config.host())
            .field("port", &self.inner.config.port())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
