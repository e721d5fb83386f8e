// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Composition root of the bridge.
//!
//! [`BridgeService`] wires the credential token, the version gate, the broker
//! session, the state sync pipeline and the command dispatcher together. The
//! host keeps two handles:
//!
//! - the service itself, to [`start`](BridgeService::start) and
//!   [`stop`](BridgeService::stop) sync;
//! - a [`StateListener`], fed with every local state change.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use duer_bridge::host::{ActionCall, ActionInvoker, EntityAllowList, StateSnapshot, StateStore};
//! use duer_bridge::{BridgeConfig, BridgeService};
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
//!         println!("{} {}", call.domain, call.service);
//!     }
//! }
//!
//! # async fn example(token: String) -> duer_bridge::Result<()> {
//! let service = BridgeService::builder(token, Arc::new(Store), Arc::new(Invoker))
//!     .config(BridgeConfig::default())
//!     .build();
//! let listener = service.listener();
//!
//! service.start(EntityAllowList::new(["light.kitchen"])).await?;
//! listener.on_state_changed(StateSnapshot::new("light.kitchen", "off"));
//! service.stop();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::command::{CommandDispatcher, EntitySync};
use crate::config::{BridgeConfig, ReportChannel};
use crate::connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, ManagerSettings, ReconnectSupervisor,
    RumqttTransport, SessionEvent, Transport,
};
use crate::credentials::Credentials;
use crate::error::Error;
use crate::host::{ActionInvoker, BootBarrier, EntityAllowList, StateSnapshot, StateStore};
use crate::sync::{
    DrainLoop, HttpReporter, MqttReporter, ReportSink, Reporter, StateSyncQueue,
};
use crate::version::VersionGate;
use crate::web::WebClient;

/// Result of [`BridgeService::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Sync is active.
    Started,
    /// Sync will activate once the host finishes booting.
    Deferred,
    /// The version gate refused; nothing was started.
    SyncDisabled,
}

/// Entry point for local state changes.
///
/// Cheap to clone. Changes are ignored while sync is inactive and for
/// entities outside the allow-list.
#[derive(Debug, Clone, Default)]
pub struct StateListener {
    active: Arc<RwLock<Option<ActiveSync>>>,
}

#[derive(Debug)]
struct ActiveSync {
    allow_list: EntityAllowList,
    queue: StateSyncQueue,
}

impl StateListener {
    /// Offers a local state change for delivery. Never blocks.
    ///
    /// Returns `true` if the change was queued.
    pub fn on_state_changed(&self, snapshot: StateSnapshot) -> bool {
        let active = self.active.read();
        let Some(active) = active.as_ref() else {
            tracing::trace!(entity_id = %snapshot.entity_id, "Sync inactive, ignoring state change");
            return false;
        };
        if !active.allow_list.contains(&snapshot.entity_id) {
            return false;
        }
        active.queue.offer(snapshot).is_ok()
    }

    /// Returns whether changes are currently accepted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.read().is_some()
    }

    fn activate(&self, allow_list: EntityAllowList, queue: StateSyncQueue) {
        *self.active.write() = Some(ActiveSync { allow_list, queue });
    }

    fn deactivate(&self) {
        self.active.write().take();
    }
}

/// Builder for [`BridgeService`].
pub struct BridgeServiceBuilder<T = RumqttTransport> {
    token: String,
    config: BridgeConfig,
    transport: T,
    store: Arc<dyn StateStore>,
    invoker: Arc<dyn ActionInvoker>,
    boot: BootBarrier,
}

impl<T: Transport + Clone> BridgeServiceBuilder<T> {
    /// Sets the bridge configuration.
    #[must_use]
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the barrier that delays activation until the host has booted
    /// (default: already open).
    #[must_use]
    pub fn boot_barrier(mut self, boot: BootBarrier) -> Self {
        self.boot = boot;
        self
    }

    /// Replaces the broker transport.
    #[must_use]
    pub fn transport<U: Transport + Clone>(self, transport: U) -> BridgeServiceBuilder<U> {
        BridgeServiceBuilder {
            token: self.token,
            config: self.config,
            transport,
            store: self.store,
            invoker: self.invoker,
            boot: self.boot,
        }
    }

    /// Builds the service. Nothing runs until [`BridgeService::start`].
    #[must_use]
    pub fn build(self) -> BridgeService<T> {
        BridgeService {
            inner: Arc::new(ServiceInner {
                token: self.token,
                config: self.config,
                transport: self.transport,
                store: self.store,
                invoker: self.invoker,
                boot: self.boot,
                listener: StateListener::default(),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

/// The bridge between the host and the remote backend.
///
/// `start` and `stop` are expected to be called from one place at a time,
/// the way the host drives an integration's lifecycle.
pub struct BridgeService<T: Transport + Clone = RumqttTransport> {
    inner: Arc<ServiceInner<T>>,
}

struct ServiceInner<T: Transport + Clone> {
    token: String,
    config: BridgeConfig,
    transport: T,
    store: Arc<dyn StateStore>,
    invoker: Arc<dyn ActionInvoker>,
    boot: BootBarrier,
    listener: StateListener,
    session: Mutex<Option<Session<T>>>,
    generation: AtomicU64,
}

struct Session<T: Transport> {
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
    manager: Option<ConnectionManager<T>>,
}

/// Everything activation needs once the version gate has passed.
struct Activation {
    generation: u64,
    credentials: Credentials,
    web: WebClient,
    allow_list: EntityAllowList,
}

impl<T> std::fmt::Debug for BridgeServiceBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServiceBuilder")
            .field("config", &self.config)
            .field("boot_ready", &self.boot.is_ready())
            .finish_non_exhaustive()
    }
}

impl<T: Transport + Clone> std::fmt::Debug for BridgeService<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeService")
            .field("running", &self.is_running())
            .field("listening", &self.inner.listener.is_active())
            .finish_non_exhaustive()
    }
}

impl BridgeService<RumqttTransport> {
    /// Starts building a service for the given credential token.
    pub fn builder(
        token: impl Into<String>,
        store: Arc<dyn StateStore>,
        invoker: Arc<dyn ActionInvoker>,
    ) -> BridgeServiceBuilder<RumqttTransport> {
        BridgeServiceBuilder {
            token: token.into(),
            config: BridgeConfig::default(),
            transport: RumqttTransport::new(),
            store,
            invoker,
            boot: BootBarrier::ready(),
        }
    }
}

impl<T: Transport + Clone> BridgeService<T> {
    /// Returns the handle the host feeds local state changes into.
    #[must_use]
    pub fn listener(&self) -> StateListener {
        self.inner.listener.clone()
    }

    /// Returns the bridge configuration.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Returns whether a session is running or waiting for the host to boot.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Observes the broker link state while a session is active.
    #[must_use]
    pub fn connection_state(&self) -> Option<watch::Receiver<ConnectionState>> {
        self.inner
            .session
            .lock()
            .as_ref()
            .and_then(|s| s.manager.as_ref())
            .map(ConnectionManager::watch_state)
    }

    /// Starts sync for the given entities.
    ///
    /// A running session is stopped first, so calling `start` again applies
    /// a new allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the credential token is malformed, or
    /// [`Error::Connect`] if the broker parameters are invalid. A refused
    /// version check is not an error; it yields
    /// [`StartOutcome::SyncDisabled`].
    pub async fn start(&self, allow_list: EntityAllowList) -> Result<StartOutcome, Error> {
        self.stop();

        let credentials = Credentials::decode(&self.inner.token).inspect_err(|e| {
            tracing::error!(error = %e, "Failed to decode credential token, sync disabled");
        })?;
        let web = WebClient::new(credentials.web_base_url(), self.inner.config.http_timeout())?;

        let gate = VersionGate::new(self.inner.config.plugin_version());
        if !gate.check(&web).await {
            tracing::error!(
                version = %gate.own_version(),
                "Version check failed, sync disabled"
            );
            return Ok(StartOutcome::SyncDisabled);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.inner.session.lock() = Some(Session {
            generation,
            tasks: Vec::new(),
            manager: None,
        });

        let activation = Activation {
            generation,
            credentials,
            web,
            allow_list,
        };

        if self.inner.boot.is_ready() {
            ServiceInner::activate(&self.inner, activation)?;
            return Ok(StartOutcome::Started);
        }

        tracing::info!("Host still starting, deferring sync activation");
        let inner = Arc::clone(&self.inner);
        let deferred = tokio::spawn(async move {
            if !inner.boot.wait().await {
                tracing::warn!("Boot signal dropped, sync never activated");
                return;
            }
            if let Err(e) = ServiceInner::activate(&inner, activation) {
                tracing::error!(error = %e, "Deferred sync activation failed");
            }
        });
        match self.inner.session.lock().as_mut() {
            Some(session) if session.generation == generation => session.tasks.push(deferred),
            _ => deferred.abort(),
        }
        Ok(StartOutcome::Deferred)
    }

    /// Stops sync: cancels every background task, closes the broker link
    /// (so the broker publishes the last will) and disables the listener.
    ///
    /// Idempotent.
    pub fn stop(&self) {
        self.inner.listener.deactivate();

        let Some(session) = self.inner.session.lock().take() else {
            return;
        };
        for task in &session.tasks {
            task.abort();
        }
        if let Some(manager) = &session.manager {
            manager.close();
        }
        tracing::info!("Bridge sync stopped");
    }
}

impl<T: Transport + Clone> ServiceInner<T> {
    fn activate(this: &Arc<Self>, activation: Activation) -> Result<(), Error> {
        let Activation {
            generation,
            credentials,
            web,
            allow_list,
        } = activation;

        let mut session = this.session.lock();
        let Some(session) = session.as_mut().filter(|s| s.generation == generation) else {
            tracing::debug!(generation, "Session replaced before activation, skipping");
            return Ok(());
        };

        let config = &this.config;
        let username = credentials.username();

        let connection = ConnectionConfig::builder()
            .host(credentials.mqtt_host())
            .port(credentials.mqtt_port())
            .client_id(username)
            .credentials(username, credentials.password())
            .keep_alive(config.keep_alive())
            .connect_timeout(config.connect_timeout())
            .tls(config.tls().clone())
            .build()?;
        let settings = ManagerSettings::default()
            .with_command_topic(config.command_topic(username))
            .with_command_qos(config.command_qos())
            .with_housekeeping_interval(config.housekeeping_interval());
        let manager = ConnectionManager::new(this.transport.clone(), connection, settings);

        let reporter = Arc::new(match config.report_channel() {
            ReportChannel::Http => Reporter::Http(HttpReporter::new(web, &credentials)),
            ReportChannel::Mqtt => Reporter::Mqtt(MqttReporter::new(
                manager.clone(),
                config.report_topic(username),
            )),
        });

        // Subscribe before the supervisor connects so no command is missed.
        let events = manager.subscribe_events();
        let dispatcher = CommandDispatcher::new(
            EntitySync::new(
                allow_list.clone(),
                Arc::clone(&this.store),
                Arc::clone(&reporter),
            ),
            Arc::clone(&this.invoker),
        );
        session.tasks.push(tokio::spawn(command_loop(events, dispatcher)));

        let supervisor =
            ReconnectSupervisor::new(manager.clone()).with_interval(config.reconnect_interval());
        session.tasks.push(tokio::spawn(supervisor.run()));

        let resync = EntitySync::new(
            allow_list.clone(),
            Arc::clone(&this.store),
            Arc::clone(&reporter),
        );
        let wait_for_link = (config.report_channel() == ReportChannel::Mqtt)
            .then(|| manager.watch_state());
        session
            .tasks
            .push(tokio::spawn(initial_resync(resync, wait_for_link)));

        let (queue, receiver) = StateSyncQueue::bounded(config.queue_capacity());
        let drain = DrainLoop::new(receiver, reporter).with_pause(config.drain_pause());
        session.tasks.push(tokio::spawn(drain.run()));

        this.listener.activate(allow_list, queue);
        session.manager = Some(manager);

        tracing::info!(
            host = %credentials.mqtt_host(),
            port = credentials.mqtt_port(),
            channel = ?config.report_channel(),
            "Bridge sync started"
        );
        Ok(())
    }
}

async fn command_loop<S, R, I>(
    mut events: broadcast::Receiver<SessionEvent>,
    dispatcher: CommandDispatcher<S, R, I>,
) where
    S: StateStore,
    R: ReportSink,
    I: ActionInvoker,
{
    loop {
        match events.recv().await {
            Ok(SessionEvent::Message(message)) => {
                let outcome = dispatcher.dispatch(&message).await;
                tracing::trace!(?outcome, "Command handled");
            }
            Ok(SessionEvent::Connected) => tracing::debug!("Command loop sees link up"),
            Ok(SessionEvent::Disconnected) => tracing::debug!("Command loop sees link down"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Command loop fell behind, commands dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn initial_resync<S: StateStore, R: ReportSink>(
    resync: EntitySync<S, R>,
    wait_for_link: Option<watch::Receiver<ConnectionState>>,
) {
    if let Some(mut state) = wait_for_link
        && state.wait_for(|s| s.is_connected()).await.is_err()
    {
        return;
    }
    if let Err(e) = resync.run().await {
        tracing::warn!(error = %e, "Initial entity sync failed");
    }
}
