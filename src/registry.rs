//! Connection registry: one logical connection per PLC endpoint.
//!
//! 接続レジストリ。エンドポイント (host, port) ごとに 1 本の論理接続を共有します。
//!
//! State machine per endpoint:
//!
//! ```text
//! Disconnected --acquire--> Connecting --Open--> Connected --Close/release--> Closed
//!                               |                                               |
//!                               +--Error/timeout--> Failed                      |
//!                                                     |                         |
//!                                                     +------> removed <--------+
//! ```
//!
//! A removed endpoint reads as `Disconnected` and the next `acquire` starts a
//! fresh attempt. The state check and the `Connecting` write happen under one
//! lock, so concurrent callers collapse onto a single in-flight attempt and
//! wait on its `watch` channel, which fires exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;

use crate::config::{ConnectOptions, EngineOptions, RegistryConfig};
use crate::endpoint::EndpointId;
use crate::engine::{EngineEvent, EngineFactory, EventReceiver, ProtocolEngine, ReadData};
use crate::error::{ClientError, EngineError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live connection handed out by the registry.
///
/// Clients hold it as `Arc<Connection>` between calls and re-acquire once
/// `is_connected` turns false.
pub struct Connection {
    endpoint: EndpointId,
    generation: u64,
    engine: Arc<dyn ProtocolEngine>,
    closed: watch::Receiver<bool>,
}

impl Connection {
    #[must_use]
    pub const fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// Distinguishes successive connections to the same endpoint.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        !*self.closed.borrow() && self.engine.is_connected()
    }

    /// Issue one elementary read; the answer arrives on the returned receiver.
    pub fn read(&self, address: &str) -> oneshot::Receiver<Result<ReadData, EngineError>> {
        let (tx, rx) = oneshot::channel();
        self.engine.read_items(address, tx);
        rx
    }

    /// Issue one elementary write; the answer arrives on the returned receiver.
    pub fn write(&self, address: &str, value: u16) -> oneshot::Receiver<Result<(), EngineError>> {
        let (tx, rx) = oneshot::channel();
        self.engine.write_items(address, value, tx);
        rx
    }

    pub fn disconnect(&self) -> Result<(), EngineError> {
        self.engine.drop_connection()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("generation", &self.generation)
            .field("closed", &*self.closed.borrow())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
enum AttemptFailure {
    Error(String),
    Timeout(Duration),
}

impl AttemptFailure {
    fn into_error(self, id: &EndpointId) -> ClientError {
        match self {
            Self::Error(message) => ClientError::ConnectionError {
                endpoint: id.to_string(),
                message,
            },
            Self::Timeout(timeout) => ClientError::ConnectionTimeout {
                endpoint: id.to_string(),
                timeout,
            },
        }
    }
}

#[derive(Clone, Debug)]
enum Attempt {
    Pending,
    Ready(Arc<Connection>),
    Failed(AttemptFailure),
}

struct Slot {
    state: ConnectionState,
    generation: u64,
    record: Arc<Connection>,
    attempt: watch::Sender<Attempt>,
    // Dropping the slot stops its event monitor.
    _abandon: oneshot::Sender<()>,
}

struct Inner {
    factory: Arc<dyn EngineFactory>,
    config: RegistryConfig,
    slots: Mutex<HashMap<EndpointId, Slot>>,
    next_generation: AtomicU64,
}

/// Shared table of PLC connections. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

static SHARED_REGISTRY: OnceCell<ConnectionRegistry> = OnceCell::new();

enum Existing {
    Wait(watch::Receiver<Attempt>),
    Reuse(Arc<Connection>),
    Stale(Arc<Connection>),
    Vacant,
}

impl ConnectionRegistry {
    pub fn new(factory: impl EngineFactory + 'static) -> Self {
        Self::with_config(factory, RegistryConfig::default())
    }

    pub fn with_config(factory: impl EngineFactory + 'static, config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory: Arc::new(factory),
                config,
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Install a process-wide registry for applications that want one.
    /// Fails when one is already installed.
    pub fn install_shared(registry: Self) -> Result<(), ClientError> {
        SHARED_REGISTRY
            .set(registry)
            .map_err(|_| ClientError::Config("shared ConnectionRegistry already set".into()))
    }

    /// The registry installed by [`ConnectionRegistry::install_shared`], if any.
    pub fn shared() -> Option<&'static Self> {
        SHARED_REGISTRY.get()
    }

    /// Current state of `host:port`; `Disconnected` when unknown.
    pub async fn get_state(&self, host: &str, port: u16) -> ConnectionState {
        let id = EndpointId::new(host, port);
        self.inner
            .slots
            .lock()
            .await
            .get(&id)
            .map_or(ConnectionState::Disconnected, |s| s.state)
    }

    /// Snapshot of every tracked endpoint.
    pub async fn endpoints(&self) -> Vec<(EndpointId, ConnectionState)> {
        let slots = self.inner.slots.lock().await;
        let mut v: Vec<_> = slots.iter().map(|(id, s)| (id.clone(), s.state)).collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        v
    }

    /// Get the live connection for `host:port`, joining an in-flight attempt
    /// or starting a new one.
    pub async fn acquire(
        &self,
        host: &str,
        port: u16,
        options: &ConnectOptions,
    ) -> Result<Arc<Connection>, ClientError> {
        let id = EndpointId::new(host, port);

        let (generation, engine, mut attempt_rx) = {
            let mut slots = self.inner.slots.lock().await;
            let existing = match slots.get(&id) {
                Some(slot) if slot.state == ConnectionState::Connecting => {
                    Existing::Wait(slot.attempt.subscribe())
                }
                Some(slot) if slot.state == ConnectionState::Connected => {
                    if slot.record.is_connected() {
                        Existing::Reuse(Arc::clone(&slot.record))
                    } else {
                        Existing::Stale(Arc::clone(&slot.record))
                    }
                }
                _ => Existing::Vacant,
            };
            match existing {
                Existing::Wait(rx) => {
                    drop(slots);
                    log::info!("[ConnectionRegistry] Connection {id} is already being established");
                    return self.wait_for_attempt(&id, rx).await;
                }
                Existing::Reuse(record) => {
                    log::debug!("[ConnectionRegistry] Reusing existing connection {id}");
                    return Ok(record);
                }
                Existing::Stale(record) => {
                    log::warn!(
                        "[ConnectionRegistry] Connection {id} (generation {}) no longer live; reconnecting",
                        record.generation
                    );
                    slots.remove(&id);
                    if let Err(e) = record.disconnect() {
                        log::debug!("[ConnectionRegistry] dropping stale connection {id}: {e}");
                    }
                }
                Existing::Vacant => {}
            }

            log::info!("[ConnectionRegistry] Creating new connection {id}");
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            let engine = self.inner.factory.create();
            let (closed_tx, closed_rx) = watch::channel(false);
            let (attempt_tx, attempt_rx) = watch::channel(Attempt::Pending);
            let (abandon_tx, abandon_rx) = oneshot::channel();
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let record = Arc::new(Connection {
                endpoint: id.clone(),
                generation,
                engine: Arc::clone(&engine),
                closed: closed_rx,
            });
            slots.insert(
                id.clone(),
                Slot {
                    state: ConnectionState::Connecting,
                    generation,
                    record,
                    attempt: attempt_tx,
                    _abandon: abandon_tx,
                },
            );
            tokio::spawn(monitor(
                Arc::clone(&self.inner),
                id.clone(),
                generation,
                Arc::clone(&engine),
                events_rx,
                abandon_rx,
                closed_tx,
            ));
            let engine_options = EngineOptions::merged(host, port, &options.engine);
            if let Err(e) = engine.open(&engine_options, events_tx) {
                drop(slots);
                log::error!("[ConnectionRegistry] Connection error {id}: {e}");
                let failure = AttemptFailure::Error(e.to_string());
                self.inner
                    .finish(&id, generation, ConnectionState::Failed, Some(failure.clone()))
                    .await;
                return Err(failure.into_error(&id));
            }
            (generation, engine, attempt_rx)
        };

        let connect_timeout = options
            .connect_timeout
            .unwrap_or(self.inner.config.connect_timeout);
        let resolved = timeout(connect_timeout, async {
            attempt_rx
                .wait_for(|a| !matches!(a, Attempt::Pending))
                .await
                .map(|a| (*a).clone())
        })
        .await;
        match resolved {
            Ok(Ok(Attempt::Ready(record))) => Ok(record),
            Ok(Ok(Attempt::Failed(failure))) => Err(failure.into_error(&id)),
            Ok(Ok(Attempt::Pending)) | Ok(Err(_)) => Err(ClientError::ConnectionError {
                endpoint: id.to_string(),
                message: "connection attempt abandoned".into(),
            }),
            Err(_) => {
                log::error!("[ConnectionRegistry] Connection timeout for {id} after {connect_timeout:?}");
                let failure = AttemptFailure::Timeout(connect_timeout);
                self.inner
                    .finish(&id, generation, ConnectionState::Failed, Some(failure.clone()))
                    .await;
                if let Err(e) = engine.drop_connection() {
                    log::debug!("[ConnectionRegistry] dropping timed-out attempt {id}: {e}");
                }
                Err(failure.into_error(&id))
            }
        }
    }

    async fn wait_for_attempt(
        &self,
        id: &EndpointId,
        mut rx: watch::Receiver<Attempt>,
    ) -> Result<Arc<Connection>, ClientError> {
        let budget = self.inner.config.wait_timeout;
        let resolved = timeout(budget, async {
            rx.wait_for(|a| !matches!(a, Attempt::Pending))
                .await
                .map(|a| (*a).clone())
        })
        .await;
        match resolved {
            Ok(Ok(Attempt::Ready(record))) => Ok(record),
            Ok(Ok(Attempt::Failed(failure))) => Err(failure.into_error(id)),
            Ok(Ok(Attempt::Pending)) | Ok(Err(_)) => Err(ClientError::ConnectionError {
                endpoint: id.to_string(),
                message: "connection attempt abandoned".into(),
            }),
            Err(_) => Err(ClientError::ConnectionTimeout {
                endpoint: id.to_string(),
                timeout: budget,
            }),
        }
    }

    /// Close the connection for `host:port`.
    ///
    /// Waits up to `close_timeout` for the engine's close notification and
    /// then removes the endpoint whether or not it arrived. No-op when the
    /// endpoint has no established connection.
    pub async fn release(&self, host: &str, port: u16) {
        let id = EndpointId::new(host, port);
        let record = {
            let slots = self.inner.slots.lock().await;
            match slots.get(&id) {
                Some(slot) if slot.state == ConnectionState::Connected => {
                    Arc::clone(&slot.record)
                }
                _ => return,
            }
        };

        log::info!("[ConnectionRegistry] Closing connection {id}");
        let mut closed = record.closed.clone();
        match record.disconnect() {
            Ok(()) => {
                let close_timeout = self.inner.config.close_timeout;
                let notified = timeout(close_timeout, async {
                    closed.wait_for(|c| *c).await.is_ok()
                })
                .await;
                if notified.is_err() {
                    log::warn!(
                        "[ConnectionRegistry] No close notification for {id} within {close_timeout:?}; forcing cleanup"
                    );
                }
            }
            Err(e) => {
                log::error!("[ConnectionRegistry] Error closing connection {id}: {e}");
            }
        }
        self.inner
            .finish(&id, record.generation, ConnectionState::Closed, None)
            .await;
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// `Connecting -> Connected`. Returns false when the attempt is gone or
    /// superseded.
    async fn mark_connected(&self, id: &EndpointId, generation: u64) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(id) {
            Some(slot)
                if slot.generation == generation && slot.state == ConnectionState::Connecting =>
            {
                slot.state = ConnectionState::Connected;
                slot.attempt
                    .send_replace(Attempt::Ready(Arc::clone(&slot.record)));
                log::info!("[ConnectionRegistry] Connection established {id}");
                true
            }
            _ => false,
        }
    }

    /// Move `id` to a terminal state and remove it, if `generation` is still
    /// the current one. Waiters on a pending attempt receive `failure`.
    async fn finish(
        &self,
        id: &EndpointId,
        generation: u64,
        terminal: ConnectionState,
        failure: Option<AttemptFailure>,
    ) {
        let mut slots = self.slots.lock().await;
        if !slots.get(id).is_some_and(|s| s.generation == generation) {
            return;
        }
        let Some(slot) = slots.remove(id) else {
            return;
        };
        log::debug!(
            "[ConnectionRegistry] {id}: {} -> {terminal} (generation {generation})",
            slot.state
        );
        if slot.state == ConnectionState::Connecting {
            let failure = failure
                .unwrap_or_else(|| AttemptFailure::Error(format!("connection {terminal}")));
            slot.attempt.send_replace(Attempt::Failed(failure));
        }
    }
}

/// Drive one connection's lifecycle from its engine events.
async fn monitor(
    inner: Arc<Inner>,
    id: EndpointId,
    generation: u64,
    engine: Arc<dyn ProtocolEngine>,
    mut events: EventReceiver,
    mut abandon: oneshot::Receiver<()>,
    closed_tx: watch::Sender<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            ev = events.recv() => ev,
            _ = &mut abandon => None,
        };
        let Some(event) = event else {
            break;
        };
        match event {
            EngineEvent::Open => {
                if !inner.mark_connected(&id, generation).await {
                    log::warn!(
                        "[ConnectionRegistry] Late open for {id} (generation {generation}); dropping it"
                    );
                    if let Err(e) = engine.drop_connection() {
                        log::debug!("[ConnectionRegistry] drop after late open {id}: {e}");
                    }
                    break;
                }
            }
            EngineEvent::Error(message) => {
                log::error!("[ConnectionRegistry] Connection error {id}: {message}");
                inner
                    .finish(
                        &id,
                        generation,
                        ConnectionState::Failed,
                        Some(AttemptFailure::Error(message)),
                    )
                    .await;
                break;
            }
            EngineEvent::Close => {
                log::info!("[ConnectionRegistry] Connection closed {id}");
                inner
                    .finish(&id, generation, ConnectionState::Closed, None)
                    .await;
                break;
            }
        }
    }
    let _ = closed_tx.send(true);
}
