// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `duer_bridge` - bridges a home automation host to a remote voice backend.
//!
//! The bridge keeps one MQTT session to the backend's broker, pushes local
//! entity state changes to the backend, and turns remote commands back into
//! local actions.
//!
//! # Components
//!
//! - **Credentials**: decodes the opaque setup token ([`Credentials`])
//! - **Connection**: one supervised broker session with last will and
//!   periodic reconnection ([`connection`])
//! - **State sync**: a bounded queue drained to the backend over HTTP or MQTT
//!   ([`sync`])
//! - **Commands**: `syncentity` resyncs and `callservice` action requests
//!   ([`command`])
//! - **Version gate**: refuses to sync when the backend requires a newer
//!   bridge ([`version`])
//! - **Service**: the composition root the host drives ([`BridgeService`])
//!
//! The host side is reached only through the traits in [`host`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use duer_bridge::host::{
//!     ActionCall, ActionInvoker, BootBarrier, EntityAllowList, StateSnapshot, StateStore,
//! };
//! use duer_bridge::{BridgeConfig, BridgeService, StartOutcome};
//!
//! struct Store;
//! impl StateStore for Store {
//!     fn snapshot(&self, entity_id: &str) -> Option<StateSnapshot> {
//!         Some(StateSnapshot::new(entity_id, "on"))
//!     }
//! }
//!
//! struct Invoker;
//! impl ActionInvoker for Invoker {
//!     fn invoke(&self, call: ActionCall) {
//!         println!("{}.{} on {}", call.domain, call.service, call.entity_id);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> duer_bridge::Result<()> {
//!     let (booted, barrier) = BootBarrier::pending();
//!     let service = BridgeService::builder("eyJtcXR0X3VybCI6...", Arc::new(Store), Arc::new(Invoker))
//!         .config(BridgeConfig::default())
//!         .boot_barrier(barrier)
//!         .build();
//!
//!     let outcome = service
//!         .start(EntityAllowList::new(["light.kitchen", "sensor.living_room"]))
//!         .await?;
//!     assert_eq!(outcome, StartOutcome::Deferred);
//!
//!     booted.fire();
//!     service
//!         .listener()
//!         .on_state_changed(StateSnapshot::new("light.kitchen", "off"));
//!
//!     service.stop();
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod host;
pub mod service;
pub mod sync;
pub mod version;
pub mod web;

pub use config::{BridgeConfig, ReportChannel};
pub use connection::ConnectionState;
pub use credentials::Credentials;
pub use error::{
    ConnectError, DecodeError, Error, ParseError, ProtocolError, QueueError, Result, VersionError,
};
pub use service::{BridgeService, BridgeServiceBuilder, StartOutcome, StateListener};
