// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded buffer between local state changes and remote delivery.
//!
//! Producers call [`StateSyncQueue::offer`], which never waits: a full queue
//! drops the change. A single [`DrainLoop`] removes changes in arrival order
//! and delivers each one exactly once; a failed delivery is logged and
//! dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use super::sink::ReportSink;
use crate::error::QueueError;
use crate::host::StateSnapshot;

/// Default number of pending changes.
pub const DEFAULT_QUEUE_CAPACITY: usize = 3000;

/// Default pause after each delivery attempt.
pub const DEFAULT_DRAIN_PAUSE: Duration = Duration::from_millis(10);

/// A change waiting for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedStateChange {
    /// Arrival order, starting at 1.
    pub sequence: u64,
    /// The entity's new state.
    pub snapshot: StateSnapshot,
}

/// Producer side of the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StateSyncQueue {
    tx: mpsc::Sender<QueuedStateChange>,
    sequence: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

/// Consumer side of the queue, owned by the drain loop.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<QueuedStateChange>,
}

impl StateSyncQueue {
    /// Creates a queue holding at most `capacity` pending changes.
    #[must_use]
    pub fn bounded(capacity: usize) -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                sequence: Arc::new(AtomicU64::new(0)),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            QueueReceiver { rx },
        )
    }

    /// Enqueues a change without waiting.
    ///
    /// Returns the sequence number assigned to the change.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] if the queue is at capacity, or
    /// [`QueueError::Closed`] if the drain loop is gone. The change is
    /// dropped in both cases.
    pub fn offer(&self, snapshot: StateSnapshot) -> Result<u64, QueueError> {
        let permit = match self.tx.try_reserve() {
            Ok(permit) => permit,
            Err(mpsc::error::TrySendError::Full(())) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    entity_id = %snapshot.entity_id,
                    capacity = self.capacity(),
                    "State sync queue full, dropping change"
                );
                return Err(QueueError::Full {
                    entity_id: snapshot.entity_id,
                    capacity: self.capacity(),
                });
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return Err(QueueError::Closed);
            }
        };

        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(entity_id = %snapshot.entity_id, sequence, "Queued state change");
        permit.send(QueuedStateChange { sequence, snapshot });
        Ok(sequence)
    }

    /// Returns the number of pending changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Returns whether no change is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of pending changes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Returns how many changes were dropped on offer.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl QueueReceiver {
    /// Waits for the next change; `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<QueuedStateChange> {
        self.rx.recv().await
    }
}

/// Delivers queued changes one at a time.
#[derive(Debug)]
pub struct DrainLoop<R> {
    receiver: QueueReceiver,
    sink: R,
    pause: Duration,
}

impl<R: ReportSink> DrainLoop<R> {
    /// Creates a drain loop with the default pause.
    #[must_use]
    pub fn new(receiver: QueueReceiver, sink: R) -> Self {
        Self {
            receiver,
            sink,
            pause: DEFAULT_DRAIN_PAUSE,
        }
    }

    /// Sets the pause after each delivery attempt.
    #[must_use]
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Runs until every producer is dropped.
    pub async fn run(mut self) {
        tracing::debug!("State sync drain loop started");
        while let Some(change) = self.receiver.recv().await {
            match self.sink.deliver_change(&change.snapshot).await {
                Ok(()) => tracing::debug!(
                    entity_id = %change.snapshot.entity_id,
                    sequence = change.sequence,
                    "State change delivered"
                ),
                Err(e) => tracing::warn!(
                    entity_id = %change.snapshot.entity_id,
                    sequence = change.sequence,
                    error = %e,
                    "State change delivery failed, dropping"
                ),
            }
            tokio::time::sleep(self.pause).await;
        }
        tracing::debug!("State sync drain loop finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl ReportSink for RecordingSink {
        async fn deliver_change(&self, snapshot: &StateSnapshot) -> Result<(), ProtocolError> {
            self.delivered.lock().push(snapshot.entity_id.clone());
            if self.fail_on.as_deref() == Some(snapshot.entity_id.as_str()) {
                return Err(ProtocolError::NotConnected);
            }
            Ok(())
        }

        async fn deliver_batch(&self, _snapshots: &[StateSnapshot]) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    fn change(id: &str) -> StateSnapshot {
        StateSnapshot::new(id, "on")
    }

    #[test]
    fn offer_assigns_increasing_sequence() {
        let (queue, _rx) = StateSyncQueue::bounded(10);
        assert_eq!(queue.offer(change("a.1")).unwrap(), 1);
        assert_eq!(queue.offer(change("a.2")).unwrap(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn full_queue_drops_newest() {
        let (queue, _rx) = StateSyncQueue::bounded(3000);
        for i in 0..3000 {
            queue.offer(change(&format!("sensor.s{i}"))).unwrap();
        }

        let err = queue.offer(change("sensor.extra")).unwrap_err();
        assert_eq!(
            err,
            QueueError::Full {
                entity_id: "sensor.extra".to_string(),
                capacity: 3000,
            }
        );
        assert_eq!(queue.len(), 3000);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn closed_queue_rejects() {
        let (queue, rx) = StateSyncQueue::bounded(1);
        drop(rx);
        assert_eq!(queue.offer(change("a.1")), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn receiver_sees_arrival_order() {
        let (queue, mut rx) = StateSyncQueue::bounded(10);
        queue.offer(change("a.1")).unwrap();
        queue.offer(change("a.2")).unwrap();

        assert_eq!(rx.recv().await.unwrap().snapshot.entity_id, "a.1");
        assert_eq!(rx.recv().await.unwrap().snapshot.entity_id, "a.2");
    }

    #[tokio::test(start_paused = true)]
    async fn drain_delivers_in_order_and_survives_failures() {
        let (queue, rx) = StateSyncQueue::bounded(10);
        let sink = Arc::new(RecordingSink {
            fail_on: Some("a.2".to_string()),
            ..RecordingSink::default()
        });

        for id in ["a.1", "a.2", "a.3"] {
            queue.offer(change(id)).unwrap();
        }
        drop(queue);

        DrainLoop::new(rx, Arc::clone(&sink)).run().await;

        assert_eq!(*sink.delivered.lock(), vec!["a.1", "a.2", "a.3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_pauses_between_deliveries() {
        let (queue, rx) = StateSyncQueue::bounded(10);
        let sink = Arc::new(RecordingSink::default());
        for id in ["a.1", "a.2", "a.3"] {
            queue.offer(change(id)).unwrap();
        }
        drop(queue);

        let start = tokio::time::Instant::now();
        DrainLoop::new(rx, Arc::clone(&sink))
            .with_pause(Duration::from_millis(10))
            .run()
            .await;

        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
