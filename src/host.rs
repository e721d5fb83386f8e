// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Seams to the host automation platform.
//!
//! The bridge never touches the host directly. It reads entity state through
//! a [`StateStore`], triggers local actions through an [`ActionInvoker`], and
//! waits on a [`BootBarrier`] until the host has finished starting.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

/// Serializable view of one entity's state.
///
/// # Examples
///
/// ```
/// use duer_bridge::host::StateSnapshot;
///
/// let snapshot = StateSnapshot::new("light.kitchen", "on").with_attribute("brightness", 200);
/// assert_eq!(snapshot.domain(), Some("light"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Entity identifier, `<domain>.<object>`.
    pub entity_id: String,
    /// Primary state value.
    pub state: String,
    /// Entity attributes.
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// When the state value last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<DateTime<Utc>>,
    /// When the state or attributes last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl StateSnapshot {
    /// Creates a snapshot without attributes or timestamps.
    #[must_use]
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
            last_changed: None,
            last_updated: None,
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets both timestamps.
    #[must_use]
    pub fn with_timestamps(mut self, changed: DateTime<Utc>, updated: DateTime<Utc>) -> Self {
        self.last_changed = Some(changed);
        self.last_updated = Some(updated);
        self
    }

    /// Returns the domain part of the entity id.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.entity_id.split_once('.').map(|(domain, _)| domain)
    }
}

/// Read access to the host's current entity states.
pub trait StateStore: Send + Sync + 'static {
    /// Returns the current state of an entity, if the host knows it.
    fn snapshot(&self, entity_id: &str) -> Option<StateSnapshot>;
}

impl<S: StateStore + ?Sized> StateStore for Arc<S> {
    fn snapshot(&self, entity_id: &str) -> Option<StateSnapshot> {
        (**self).snapshot(entity_id)
    }
}

/// A local action requested by the remote backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    /// Action domain, taken from the entity id.
    pub domain: String,
    /// Action name within the domain.
    pub service: String,
    /// Target entity.
    pub entity_id: String,
    /// Action arguments; always contains `entity_id`.
    pub data: Map<String, Value>,
}

/// Fire-and-forget invocation of local actions.
///
/// Implementations must not block; the bridge does not wait for the action
/// to complete and never reports its outcome back.
pub trait ActionInvoker: Send + Sync + 'static {
    /// Schedules the action.
    fn invoke(&self, call: ActionCall);
}

impl<I: ActionInvoker + ?Sized> ActionInvoker for Arc<I> {
    fn invoke(&self, call: ActionCall) {
        (**self).invoke(call);
    }
}

/// The entities selected for synchronization.
///
/// Keeps the host-supplied order and drops duplicates. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct EntityAllowList {
    inner: Arc<AllowListInner>,
}

#[derive(Debug, Default)]
struct AllowListInner {
    ordered: Vec<String>,
    lookup: HashSet<String>,
}

impl EntityAllowList {
    /// Builds an allow-list from entity ids.
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = AllowListInner::default();
        for entity in entities {
            let entity = entity.into();
            if inner.lookup.insert(entity.clone()) {
                inner.ordered.push(entity);
            }
        }
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns whether the entity is selected.
    #[must_use]
    pub fn contains(&self, entity_id: &str) -> bool {
        self.inner.lookup.contains(entity_id)
    }

    /// Iterates the entity ids in host order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.inner.ordered.iter().map(String::as_str)
    }

    /// Returns the number of selected entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.ordered.len()
    }

    /// Returns whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.ordered.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for EntityAllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Waits until the host reports that it has finished booting.
#[derive(Debug, Clone)]
pub struct BootBarrier {
    rx: watch::Receiver<bool>,
}

/// Opens a [`BootBarrier`]. Dropping it without signalling leaves the
/// barrier closed forever.
#[derive(Debug)]
pub struct BootSignal {
    tx: watch::Sender<bool>,
}

impl BootBarrier {
    /// A barrier that is already open.
    #[must_use]
    pub fn ready() -> Self {
        let (_, rx) = watch::channel(true);
        Self { rx }
    }

    /// A closed barrier and the signal that opens it.
    #[must_use]
    pub fn pending() -> (BootSignal, Self) {
        let (tx, rx) = watch::channel(false);
        (BootSignal { tx }, Self { rx })
    }

    /// Returns whether the host has finished booting.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the host has booted.
    ///
    /// Returns `false` if the signal was dropped before firing.
    pub async fn wait(&self) -> bool {
        let mut rx = self.rx.clone();
        rx.wait_for(|ready| *ready).await.is_ok()
    }
}

impl BootSignal {
    /// Marks the host as booted.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serializes_without_missing_timestamps() {
        let snapshot = StateSnapshot::new("sensor.temp", "21.5").with_attribute("unit", "°C");
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "entity_id": "sensor.temp",
                "state": "21.5",
                "attributes": {"unit": "°C"}
            })
        );
    }

    #[test]
    fn snapshot_serializes_timestamps_as_rfc3339() {
        let at = DateTime::parse_from_rfc3339("2024-07-08T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let snapshot = StateSnapshot::new("switch.fan", "off").with_timestamps(at, at);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["last_changed"], "2024-07-08T10:00:00Z");
        assert_eq!(json["last_updated"], "2024-07-08T10:00:00Z");
    }

    #[test]
    fn domain_requires_separator() {
        assert_eq!(StateSnapshot::new("light.a", "on").domain(), Some("light"));
        assert_eq!(StateSnapshot::new("nodot", "on").domain(), None);
    }

    #[test]
    fn allow_list_keeps_order_and_dedups() {
        let list = EntityAllowList::new(["light.b", "light.a", "light.b"]);
        assert_eq!(list.len(), 2);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec!["light.b", "light.a"]);
        assert!(list.contains("light.a"));
        assert!(!list.contains("light.c"));
    }

    #[tokio::test]
    async fn barrier_opens_on_signal() {
        let (signal, barrier) = BootBarrier::pending();
        assert!(!barrier.is_ready());

        let waiter = tokio::spawn({
            let barrier = barrier.clone();
            async move { barrier.wait().await }
        });
        signal.fire();

        assert!(waiter.await.unwrap());
        assert!(barrier.is_ready());
    }

    #[tokio::test]
    async fn barrier_dropped_signal_never_opens() {
        let (signal, barrier) = BootBarrier::pending();
        drop(signal);
        assert!(!barrier.wait().await);
    }

    #[tokio::test]
    async fn ready_barrier_is_open() {
        assert!(BootBarrier::ready().wait().await);
    }
}
