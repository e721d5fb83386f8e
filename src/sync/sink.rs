// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delivery of state reports to the remote backend.
//!
//! Reports are wrapped in a typed envelope. Over HTTP the envelope also
//! carries the account identity:
//!
//! ```json
//! {"type": "state_changed", "data": {...}, "openid": "<username>", "secret": "<password>"}
//! ```
//!
//! Over MQTT the broker session already authenticates the account, so only
//! `type` and `data` are sent.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::connection::{ConnectionManager, OutboundMessage, Transport};
use crate::credentials::Credentials;
use crate::error::ProtocolError;
use crate::host::StateSnapshot;
use crate::web::{CHANGE_STATE_PATH, SYNC_ENTITY_PATH, WebClient};

/// Report type for a single state change.
pub const STATE_CHANGED: &str = "state_changed";
/// Report type for a full resync.
pub const SYNC_ENTITY: &str = "syncentity";

/// Envelope of one report.
#[derive(Debug, Serialize)]
pub struct ReportEnvelope<'a, D: Serialize + ?Sized> {
    /// Report type.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Report payload.
    pub data: &'a D,
    /// Account username, HTTP only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openid: Option<&'a str>,
    /// Account password, HTTP only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<&'a str>,
}

impl<'a, D: Serialize + ?Sized> ReportEnvelope<'a, D> {
    /// Creates an envelope without account identity.
    #[must_use]
    pub fn new(kind: &'static str, data: &'a D) -> Self {
        Self {
            kind,
            data,
            openid: None,
            secret: None,
        }
    }

    /// Attaches the account identity.
    #[must_use]
    pub fn with_identity(mut self, openid: &'a str, secret: &'a str) -> Self {
        self.openid = Some(openid);
        self.secret = Some(secret);
        self
    }
}

/// Destination for state reports.
pub trait ReportSink: Send + Sync + 'static {
    /// Reports one entity's new state.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the report could not be delivered.
    fn deliver_change(
        &self,
        snapshot: &StateSnapshot,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;

    /// Reports the full set of selected entities.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the report could not be delivered.
    fn deliver_batch(
        &self,
        snapshots: &[StateSnapshot],
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send;
}

impl<R: ReportSink> ReportSink for Arc<R> {
    fn deliver_change(
        &self,
        snapshot: &StateSnapshot,
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send {
        (**self).deliver_change(snapshot)
    }

    fn deliver_batch(
        &self,
        snapshots: &[StateSnapshot],
    ) -> impl Future<Output = Result<(), ProtocolError>> + Send {
        (**self).deliver_batch(snapshots)
    }
}

/// Reports over the backend's REST API.
#[derive(Debug, Clone)]
pub struct HttpReporter {
    web: WebClient,
    username: String,
    password: String,
}

impl HttpReporter {
    /// Creates a reporter that authenticates with the given credentials.
    #[must_use]
    pub fn new(web: WebClient, credentials: &Credentials) -> Self {
        Self {
            web,
            username: credentials.username().to_string(),
            password: credentials.password().to_string(),
        }
    }

    async fn post<D: Serialize + Sync + ?Sized>(
        &self,
        path: &str,
        kind: &'static str,
        data: &D,
    ) -> Result<(), ProtocolError> {
        let envelope = ReportEnvelope::new(kind, data).with_identity(&self.username, &self.password);
        self.web.post_json(path, &envelope).await
    }
}

impl ReportSink for HttpReporter {
    async fn deliver_change(&self, snapshot: &StateSnapshot) -> Result<(), ProtocolError> {
        self.post(CHANGE_STATE_PATH, STATE_CHANGED, snapshot).await
    }

    async fn deliver_batch(&self, snapshots: &[StateSnapshot]) -> Result<(), ProtocolError> {
        self.post(SYNC_ENTITY_PATH, SYNC_ENTITY, snapshots).await
    }
}

/// Reports over the broker session.
#[derive(Debug)]
pub struct MqttReporter<T: Transport> {
    manager: ConnectionManager<T>,
    topic: String,
}

impl<T: Transport> Clone for MqttReporter<T> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            topic: self.topic.clone(),
        }
    }
}

impl<T: Transport> MqttReporter<T> {
    /// Creates a reporter publishing to `topic`.
    #[must_use]
    pub fn new(manager: ConnectionManager<T>, topic: impl Into<String>) -> Self {
        Self {
            manager,
            topic: topic.into(),
        }
    }

    /// Returns the report topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn publish<D: Serialize + ?Sized>(&self, kind: &'static str, data: &D) -> Result<(), ProtocolError> {
        let payload =
            serde_json::to_vec(&ReportEnvelope::new(kind, data)).map_err(ProtocolError::Encode)?;
        if self
            .manager
            .publish(OutboundMessage::new(self.topic.clone(), payload))?
        {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }
}

impl<T: Transport> ReportSink for MqttReporter<T> {
    async fn deliver_change(&self, snapshot: &StateSnapshot) -> Result<(), ProtocolError> {
        self.publish(STATE_CHANGED, snapshot)
    }

    async fn deliver_batch(&self, snapshots: &[StateSnapshot]) -> Result<(), ProtocolError> {
        self.publish(SYNC_ENTITY, snapshots)
    }
}

/// The report channel chosen at start-up.
#[derive(Debug)]
pub enum Reporter<T: Transport> {
    /// REST API.
    Http(HttpReporter),
    /// Broker session.
    Mqtt(MqttReporter<T>),
}

impl<T: Transport> Clone for Reporter<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Http(r) => Self::Http(r.clone()),
            Self::Mqtt(r) => Self::Mqtt(r.clone()),
        }
    }
}

impl<T: Transport> ReportSink for Reporter<T> {
    async fn deliver_change(&self, snapshot: &StateSnapshot) -> Result<(), ProtocolError> {
        match self {
            Self::Http(r) => r.deliver_change(snapshot).await,
            Self::Mqtt(r) => r.deliver_change(snapshot).await,
        }
    }

    async fn deliver_batch(&self, snapshots: &[StateSnapshot]) -> Result<(), ProtocolError> {
        match self {
            Self::Http(r) => r.deliver_batch(snapshots).await,
            Self::Mqtt(r) => r.deliver_batch(snapshots).await,
        }
    }
}
