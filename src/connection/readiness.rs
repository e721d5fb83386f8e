// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Socket readiness bookkeeping.
//!
//! The manager watches the current socket for readability from the moment it
//! opens, and for writability only while the transport has outbound bytes
//! queued. [`Readiness`] records which interest is held for which socket so
//! a close removes everything exactly once, even if the close is reported
//! twice (once by the transport, once by a local `close()`).

/// Identifies one socket: one successful or attempted `open()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    /// Creates a socket id from a raw counter value.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// Kind of readiness interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    /// Socket readable.
    Read,
    /// Socket writable.
    Write,
}

/// Read/write interest currently registered for the link's socket.
#[derive(Debug, Default)]
pub struct Readiness {
    socket: Option<SocketId>,
    read: bool,
    write: bool,
    removals: u64,
}

impl Readiness {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers read interest for a freshly opened socket.
    ///
    /// Any interest still held for a previous socket is dropped. Returns
    /// `true` if the interest was newly registered.
    pub fn register_read(&mut self, socket: SocketId) -> bool {
        if self.socket == Some(socket) && self.read {
            return false;
        }
        if self.socket != Some(socket) {
            self.write = false;
        }
        self.socket = Some(socket);
        self.read = true;
        true
    }

    /// Registers write interest while outbound bytes are pending.
    ///
    /// Ignored unless `socket` is the one currently watched for reads.
    pub fn register_write(&mut self, socket: SocketId) -> bool {
        if self.socket != Some(socket) || !self.read || self.write {
            return false;
        }
        self.write = true;
        true
    }

    /// Drops write interest once the outbound buffer is drained.
    pub fn unregister_write(&mut self, socket: SocketId) -> bool {
        if self.socket != Some(socket) || !self.write {
            return false;
        }
        self.write = false;
        true
    }

    /// Removes all interest for `socket`.
    ///
    /// Returns the interests that were removed; empty if nothing was held
    /// for that socket, so a second call is a no-op.
    pub fn deregister_all(&mut self, socket: SocketId) -> Vec<Interest> {
        if self.socket != Some(socket) {
            return Vec::new();
        }
        let mut removed = Vec::with_capacity(2);
        if self.read {
            removed.push(Interest::Read);
        }
        if self.write {
            removed.push(Interest::Write);
        }
        self.socket = None;
        self.read = false;
        self.write = false;
        if !removed.is_empty() {
            self.removals += 1;
        }
        removed
    }

    /// Returns the socket currently watched, if any.
    #[must_use]
    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    /// Returns whether the given interest is registered.
    #[must_use]
    pub fn has_interest(&self, interest: Interest) -> bool {
        match interest {
            Interest::Read => self.read,
            Interest::Write => self.write,
        }
    }

    /// Returns how many times interest has been torn down.
    #[must_use]
    pub fn removals(&self) -> u64 {
        self.removals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1: SocketId = SocketId(1);
    const S2: SocketId = SocketId(2);

    #[test]
    fn read_then_write_then_drain() {
        let mut r = Readiness::new();
        assert!(r.register_read(S1));
        assert!(!r.register_read(S1));
        assert!(r.register_write(S1));
        assert!(!r.register_write(S1));
        assert!(r.has_interest(Interest::Write));
        assert!(r.unregister_write(S1));
        assert!(!r.has_interest(Interest::Write));
        assert!(r.has_interest(Interest::Read));
    }

    #[test]
    fn write_requires_open_socket() {
        let mut r = Readiness::new();
        assert!(!r.register_write(S1));
        r.register_read(S1);
        assert!(!r.register_write(S2));
    }

    #[test]
    fn deregister_all_removes_once() {
        let mut r = Readiness::new();
        r.register_read(S1);
        r.register_write(S1);

        let removed = r.deregister_all(S1);
        assert_eq!(removed, vec![Interest::Read, Interest::Write]);
        assert!(r.deregister_all(S1).is_empty());
        assert_eq!(r.removals(), 1);
        assert!(r.socket().is_none());
    }

    #[test]
    fn stale_socket_cannot_deregister_current() {
        let mut r = Readiness::new();
        r.register_read(S1);
        r.register_read(S2);
        assert!(r.deregister_all(S1).is_empty());
        assert!(r.has_interest(Interest::Read));
        assert_eq!(r.socket(), Some(S2));
    }

    #[test]
    fn new_socket_drops_old_write_interest() {
        let mut r = Readiness::new();
        r.register_read(S1);
        r.register_write(S1);
        r.register_read(S2);
        assert!(!r.has_interest(Interest::Write));
    }
}
