// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory transport for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::QoS;

use super::config::ConnectionConfig;
use super::event::{EventSink, TransportEvent};
use super::readiness::SocketId;
use super::transport::{Link, OutboundMessage, Transport};
use crate::error::{ConnectError, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    Accept,
    Refuse,
    Silent,
}

#[derive(Debug)]
struct State {
    handshake: Mutex<Handshake>,
    fail_open: AtomicBool,
    healthy: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    housekeeping_ticks: AtomicUsize,
    published: Mutex<Vec<OutboundMessage>>,
    subscriptions: Mutex<Vec<String>>,
    sink: Mutex<Option<EventSink>>,
}

/// Records everything the manager asks of it.
#[derive(Debug, Clone)]
pub(crate) struct MockTransport {
    state: Arc<State>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(State {
                handshake: Mutex::new(Handshake::Accept),
                fail_open: AtomicBool::new(false),
                healthy: AtomicBool::new(true),
                open_delay: Mutex::new(None),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                housekeeping_ticks: AtomicUsize::new(0),
                published: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                sink: Mutex::new(None),
            }),
        }
    }

    /// Broker answers with a refused ConnAck.
    pub(crate) fn refusing(self) -> Self {
        *self.state.handshake.lock() = Handshake::Refuse;
        self
    }

    /// Broker never answers the handshake.
    pub(crate) fn silent(self) -> Self {
        *self.state.handshake.lock() = Handshake::Silent;
        self
    }

    /// `open` itself fails.
    pub(crate) fn failing(self) -> Self {
        self.state.fail_open.store(true, Ordering::Release);
        self
    }

    /// `open` sleeps before returning.
    pub(crate) fn with_open_delay(self, delay: Duration) -> Self {
        *self.state.open_delay.lock() = Some(delay);
        self
    }

    pub(crate) fn set_accepting(&self) {
        *self.state.handshake.lock() = Handshake::Accept;
        self.state.fail_open.store(false, Ordering::Release);
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::Release);
    }

    pub(crate) fn opens(&self) -> usize {
        self.state.opens.load(Ordering::Acquire)
    }

    pub(crate) fn closes(&self) -> usize {
        self.state.closes.load(Ordering::Acquire)
    }

    pub(crate) fn housekeeping_ticks(&self) -> usize {
        self.state.housekeeping_ticks.load(Ordering::Acquire)
    }

    pub(crate) fn published(&self) -> Vec<OutboundMessage> {
        self.state.published.lock().clone()
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.state.subscriptions.lock().clone()
    }

    pub(crate) fn last_socket(&self) -> Option<SocketId> {
        self.state.sink.lock().as_ref().map(EventSink::socket)
    }

    /// Injects an event as if raised by the most recent link.
    pub(crate) fn emit(&self, event: TransportEvent) {
        if let Some(sink) = self.state.sink.lock().as_ref() {
            sink.emit(event);
        }
    }
}

impl Transport for MockTransport {
    type Link = MockLink;

    async fn open(
        &self,
        _config: &ConnectionConfig,
        events: EventSink,
    ) -> Result<MockLink, ConnectError> {
        self.state.opens.fetch_add(1, Ordering::AcqRel);
        let delay = *self.state.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_open.load(Ordering::Acquire) {
            return Err(ConnectError::Transport("mock open failure".to_string()));
        }

        *self.state.sink.lock() = Some(events.clone());
        let handshake = *self.state.handshake.lock();
        match handshake {
            Handshake::Accept => {
                events.emit(TransportEvent::SocketOpened);
                events.emit(TransportEvent::ConnAck {
                    accepted: true,
                    code: "Success".to_string(),
                });
            }
            Handshake::Refuse => {
                events.emit(TransportEvent::SocketOpened);
                events.emit(TransportEvent::ConnAck {
                    accepted: false,
                    code: "NotAuthorized".to_string(),
                });
            }
            Handshake::Silent => events.emit(TransportEvent::SocketOpened),
        }

        Ok(MockLink {
            state: Arc::clone(&self.state),
            events,
        })
    }
}

#[derive(Debug)]
pub(crate) struct MockLink {
    state: Arc<State>,
    events: EventSink,
}

impl Link for MockLink {
    fn publish(&self, message: OutboundMessage) -> Result<(), ProtocolError> {
        self.events.emit(TransportEvent::WritePending);
        self.state.published.lock().push(message);
        self.events.emit(TransportEvent::WriteDrained);
        Ok(())
    }

    fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), ProtocolError> {
        self.state.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    fn housekeeping(&self) -> bool {
        self.state.housekeeping_ticks.fetch_add(1, Ordering::AcqRel);
        self.state.healthy.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.state.closes.fetch_add(1, Ordering::AcqRel);
    }
}
