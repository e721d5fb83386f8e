// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT session handling.
//!
//! - [`ConnectionConfig`]: broker parameters (host, identity, TLS, last will)
//! - [`Transport`] / [`Link`]: the seam to the network client, with
//!   [`RumqttTransport`] as the production implementation
//! - [`ConnectionManager`]: owns the single session and its state machine
//! - [`ReconnectSupervisor`]: periodic reconnection with overlap protection

mod config;
mod event;
mod manager;
#[cfg(test)]
pub(crate) mod mock;
mod readiness;
mod rumqtt;
mod state;
mod supervisor;
mod transport;

pub use config::{ConnectionConfig, ConnectionConfigBuilder, LAST_WILL_PAYLOAD, TlsOptions};
pub use event::{EventSink, SessionEvent, SessionEventBus, TransportEvent};
pub use manager::{ConnectionManager, ManagerSettings};
pub use readiness::{Interest, Readiness, SocketId};
pub use rumqtt::{RumqttLink, RumqttTransport};
pub use state::ConnectionState;
pub use supervisor::{DEFAULT_RECONNECT_INTERVAL, ReconnectSupervisor, TickOutcome};
pub use transport::{InboundMessage, Link, OutboundMessage, Transport};

pub use rumqttc::QoS;
