// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Periodic reconnection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::manager::ConnectionManager;
use super::transport::Transport;

/// Default time between reconnect checks.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(60);

/// Result of one supervisor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The link was already up; nothing to do.
    AlreadyConnected,
    /// Another reconnect attempt is still running; this tick was skipped.
    AttemptInFlight,
    /// A reconnect attempt succeeded.
    Reconnected,
    /// A reconnect attempt failed; the next tick retries.
    Failed,
}

/// Re-opens the session whenever a tick finds it down.
///
/// At most one attempt runs at a time; ticks that overlap a running attempt
/// are skipped rather than queued.
#[derive(Debug)]
pub struct ReconnectSupervisor<T: Transport> {
    manager: ConnectionManager<T>,
    interval: Duration,
    guard: Arc<Mutex<()>>,
}

impl<T: Transport> Clone for ReconnectSupervisor<T> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            interval: self.interval,
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<T: Transport> ReconnectSupervisor<T> {
    /// Creates a supervisor for the given manager.
    #[must_use]
    pub fn new(manager: ConnectionManager<T>) -> Self {
        Self {
            manager,
            interval: DEFAULT_RECONNECT_INTERVAL,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Sets the time between checks.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Returns the time between checks.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs one check.
    pub async fn tick(&self) -> TickOutcome {
        if self.manager.state().is_connected() {
            return TickOutcome::AlreadyConnected;
        }

        let Ok(_attempt) = self.guard.try_lock() else {
            tracing::debug!("Reconnect already in progress, skipping tick");
            return TickOutcome::AttemptInFlight;
        };

        // State may have changed while the previous attempt held the guard.
        if self.manager.state().is_connected() {
            return TickOutcome::AlreadyConnected;
        }

        tracing::info!(host = %self.manager.config().host(), "Attempting MQTT reconnect");
        match self.manager.open().await {
            Ok(()) => {
                tracing::info!("MQTT reconnect succeeded");
                TickOutcome::Reconnected
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_in_secs = self.interval.as_secs(),
                    "MQTT reconnect failed"
                );
                TickOutcome::Failed
            }
        }
    }

    /// Ticks forever. The first tick runs immediately.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::config::ConnectionConfig;
    use crate::connection::manager::ManagerSettings;
    use crate::connection::mock::MockTransport;
    use crate::connection::{ConnectionState, TransportEvent};

    fn supervisor(transport: &MockTransport) -> ReconnectSupervisor<MockTransport> {
        let config = ConnectionConfig::builder()
            .host("broker.test")
            .connect_timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        let manager = ConnectionManager::new(transport.clone(), config, ManagerSettings::default());
        ReconnectSupervisor::new(manager).with_interval(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn tick_connects_when_down() {
        let transport = MockTransport::new();
        let sup = supervisor(&transport);

        assert_eq!(sup.tick().await, TickOutcome::Reconnected);
        assert_eq!(sup.tick().await, TickOutcome::AlreadyConnected);
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test]
    async fn failed_attempt_is_retried_next_tick() {
        let transport = MockTransport::new().failing();
        let sup = supervisor(&transport);

        assert_eq!(sup.tick().await, TickOutcome::Failed);
        transport.set_accepting();
        assert_eq!(sup.tick().await, TickOutcome::Reconnected);
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test]
    async fn overlapping_ticks_make_one_attempt() {
        let transport = MockTransport::new().with_open_delay(Duration::from_millis(50));
        let sup = supervisor(&transport);

        let (a, b) = tokio::join!(sup.tick(), sup.tick());

        assert_eq!(transport.opens(), 1);
        let mut outcomes = [a, b];
        outcomes.sort_by_key(|o| *o == TickOutcome::Reconnected);
        assert_eq!(
            outcomes,
            [TickOutcome::AttemptInFlight, TickOutcome::Reconnected]
        );
    }

    #[tokio::test]
    async fn reconnects_after_drop() {
        let transport = MockTransport::new();
        let sup = supervisor(&transport);
        sup.tick().await;

        let mut state = sup.manager.watch_state();
        transport.emit(TransportEvent::SocketClosed {
            reason: "reset".to_string(),
        });
        state
            .wait_for(|s| *s == ConnectionState::Disconnected)
            .await
            .unwrap();

        assert_eq!(sup.tick().await, TickOutcome::Reconnected);
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_on_interval() {
        let transport = MockTransport::new().failing();
        let sup = supervisor(&transport);
        let handle = tokio::spawn(sup.run());

        tokio::time::sleep(Duration::from_secs(130)).await;
        handle.abort();

        // Immediate first tick, then at 60s and 120s.
        assert_eq!(transport.opens(), 3);
    }
}
