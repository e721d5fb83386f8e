// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Commands sent by the remote backend over the command topic.
//!
//! Two commands are understood:
//!
//! ```json
//! {"type": "syncentity"}
//! {"type": "callservice", "entity_id": "light.kitchen", "service": "turn_on", "service_data": {}}
//! ```
//!
//! Malformed payloads are logged and dropped; unknown types are ignored.

use serde_json::{Map, Value};

use crate::connection::InboundMessage;
use crate::error::{ParseError, ProtocolError};
use crate::host::{ActionCall, ActionInvoker, EntityAllowList, StateSnapshot, StateStore};
use crate::sync::ReportSink;

/// Discriminator of a full resync request.
pub const SYNC_ENTITY_COMMAND: &str = "syncentity";
/// Discriminator of a local action request.
pub const CALL_SERVICE_COMMAND: &str = "callservice";

/// A parsed remote command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Report every selected entity.
    SyncEntities,
    /// Invoke a local action.
    CallService(ActionCall),
}

impl Command {
    /// Parses a command payload.
    ///
    /// Only the fields the command type needs are read, so a `syncentity`
    /// carrying unrelated fields of any shape still parses.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the payload is not a JSON object, has no
    /// `type`, names an unknown type, or is an incomplete `callservice`.
    ///
    /// # Examples
    ///
    /// ```
    /// use duer_bridge::command::Command;
    ///
    /// let cmd = Command::parse(br#"{"type":"callservice","entity_id":"light.kitchen","service":"turn_on"}"#).unwrap();
    /// match cmd {
    ///     Command::CallService(call) => assert_eq!(call.domain, "light"),
    ///     Command::SyncEntities => unreachable!(),
    /// }
    /// ```
    pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
        let Value::Object(mut fields) = serde_json::from_slice::<Value>(payload)? else {
            return Err(ParseError::InvalidValue {
                field: "payload".to_string(),
                message: "expected a JSON object".to_string(),
            });
        };
        let kind = required_str(&mut fields, "type")?;

        match kind.as_str() {
            SYNC_ENTITY_COMMAND => Ok(Self::SyncEntities),
            CALL_SERVICE_COMMAND => Self::call_service(fields).map(Self::CallService),
            _ => Err(ParseError::UnknownCommand(kind)),
        }
    }

    fn call_service(mut fields: Map<String, Value>) -> Result<ActionCall, ParseError> {
        let entity_id = required_str(&mut fields, "entity_id")?;
        let service = required_str(&mut fields, "service")?;

        let domain = match entity_id.split_once('.') {
            Some((domain, _)) if !domain.is_empty() => domain.to_string(),
            _ => {
                return Err(ParseError::InvalidValue {
                    field: "entity_id".to_string(),
                    message: format!("'{entity_id}' has no domain prefix"),
                });
            }
        };

        let mut data = match fields.remove("service_data") {
            Some(Value::Object(map)) => map,
            None | Some(Value::Null) => Map::new(),
            Some(other) => {
                return Err(ParseError::InvalidValue {
                    field: "service_data".to_string(),
                    message: format!("expected an object, got {other}"),
                });
            }
        };
        data.insert("entity_id".to_string(), Value::String(entity_id.clone()));

        Ok(ActionCall {
            domain,
            service,
            entity_id,
            data,
        })
    }
}

/// Takes a non-empty string field out of a command object.
fn required_str(fields: &mut Map<String, Value>, field: &str) -> Result<String, ParseError> {
    match fields.remove(field) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value),
        None | Some(Value::Null | Value::String(_)) => {
            Err(ParseError::MissingField(field.to_string()))
        }
        Some(other) => Err(ParseError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a string, got {other}"),
        }),
    }
}

/// Builds and delivers the full resync batch.
#[derive(Debug)]
pub struct EntitySync<S, R> {
    allow_list: EntityAllowList,
    store: S,
    sink: R,
}

impl<S: StateStore, R: ReportSink> EntitySync<S, R> {
    /// Creates a resync over the given entities.
    #[must_use]
    pub fn new(allow_list: EntityAllowList, store: S, sink: R) -> Self {
        Self {
            allow_list,
            store,
            sink,
        }
    }

    /// Collects the current state of every selected entity the host knows,
    /// in allow-list order.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<StateSnapshot> {
        self.allow_list
            .iter()
            .filter_map(|entity_id| {
                let snapshot = self.store.snapshot(entity_id);
                if snapshot.is_none() {
                    tracing::debug!(entity_id = %entity_id, "Entity unknown to host, skipping");
                }
                snapshot
            })
            .collect()
    }

    /// Delivers one batch with every known selected entity.
    ///
    /// Returns the number of entities sent.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the batch could not be delivered.
    pub async fn run(&self) -> Result<usize, ProtocolError> {
        let snapshots = self.snapshot_all();
        tracing::debug!(count = snapshots.len(), "Syncing entities");
        self.sink.deliver_batch(&snapshots).await?;
        tracing::info!(count = snapshots.len(), "Entity sync delivered");
        Ok(snapshots.len())
    }
}

/// What the dispatcher did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A resync batch with this many entities was delivered.
    Resynced(usize),
    /// The action was handed to the invoker.
    Invoked(ActionCall),
    /// The command type is not handled.
    Ignored,
    /// The message was malformed or its handling failed.
    Dropped,
}

/// Routes inbound commands to the resync or the action invoker.
#[derive(Debug)]
pub struct CommandDispatcher<S, R, I> {
    sync: EntitySync<S, R>,
    invoker: I,
}

impl<S: StateStore, R: ReportSink, I: ActionInvoker> CommandDispatcher<S, R, I> {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(sync: EntitySync<S, R>, invoker: I) -> Self {
        Self { sync, invoker }
    }

    /// Returns the resync used for `syncentity`.
    #[must_use]
    pub fn entity_sync(&self) -> &EntitySync<S, R> {
        &self.sync
    }

    /// Handles one inbound message. Never fails.
    pub async fn dispatch(&self, message: &InboundMessage) -> DispatchOutcome {
        let command = match Command::parse(&message.payload) {
            Ok(command) => command,
            Err(ParseError::UnknownCommand(kind)) => {
                tracing::debug!(topic = %message.topic, kind = %kind, "Ignoring unknown command");
                return DispatchOutcome::Ignored;
            }
            Err(e) => {
                tracing::warn!(
                    topic = %message.topic,
                    error = %e,
                    payload = %message.payload_str(),
                    "Dropping malformed command"
                );
                return DispatchOutcome::Dropped;
            }
        };

        match command {
            Command::SyncEntities => match self.sync.run().await {
                Ok(count) => DispatchOutcome::Resynced(count),
                Err(e) => {
                    tracing::warn!(error = %e, "Entity sync failed");
                    DispatchOutcome::Dropped
                }
            },
            Command::CallService(call) => {
                tracing::debug!(
                    domain = %call.domain,
                    service = %call.service,
                    entity_id = %call.entity_id,
                    "Invoking local action"
                );
                self.invoker.invoke(call.clone());
                DispatchOutcome::Invoked(call)
            }
        }
    }
}
