// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker link state.

/// State of the broker link.
///
/// Only the [`ConnectionManager`](super::ConnectionManager) writes this value.
/// Everything else observes it through
/// [`ConnectionManager::watch_state`](super::ConnectionManager::watch_state).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No usable link.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The handshake completed and the link is usable.
    Connected,
}

impl ConnectionState {
    /// Returns true if the link is usable.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}
