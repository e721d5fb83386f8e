// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Local-to-remote state synchronization.

mod queue;
mod sink;

pub use queue::{
    DEFAULT_DRAIN_PAUSE, DEFAULT_QUEUE_CAPACITY, DrainLoop, QueueReceiver, QueuedStateChange,
    StateSyncQueue,
};
pub use sink::{
    HttpReporter, MqttReporter, ReportEnvelope, ReportSink, Reporter, STATE_CHANGED, SYNC_ENTITY,
};
