//! melsec_tags_mock
//!
//! 実機なしで `melsec_tags` を試験するためのインメモリ PLC です。
//!
//! `MockPlc` holds word memory shared by every engine it creates. Engines
//! report `Open` asynchronously after an optional delay and answer word
//! operations from that memory. Faults can be injected per PLC (refuse or
//! stall connections) and per address (engine errors, requests that are
//! never answered).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use melsec_tags::engine::{
    EngineEvent, EngineFactory, EventSender, ProtocolEngine, ReadData, ReadReply, WriteReply,
};
use melsec_tags::{EngineError, EngineOptions};

/// One elementary operation as seen by the mock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Read(String),
    Write(String, u16),
}

#[derive(Default)]
struct Faults {
    refuse: Option<String>,
    reject_open: Option<String>,
    never_open: bool,
    open_delay: Duration,
    silent_close: bool,
    read_errors: HashMap<String, String>,
    write_errors: HashMap<String, String>,
    hang: HashSet<String>,
}

#[derive(Default)]
struct State {
    memory: Mutex<HashMap<String, u16>>,
    faults: Mutex<Faults>,
    ops: Mutex<Vec<Op>>,
    engines: Mutex<Vec<Weak<MockEngine>>>,
    created: AtomicUsize,
    last_options: Mutex<Option<EngineOptions>>,
    parked_reads: Mutex<Vec<ReadReply>>,
    parked_writes: Mutex<Vec<WriteReply>>,
}

// Poisoning only follows a panic in another test thread; keep going with the data.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn key(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

/// In-memory PLC. Clones share memory, faults and statistics.
#[derive(Clone, Default)]
pub struct MockPlc {
    state: Arc<State>,
}

impl MockPlc {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine factory bound to this PLC, for `ConnectionRegistry::new`.
    #[must_use]
    pub fn factory(&self) -> impl EngineFactory + 'static {
        let plc = self.clone();
        move || plc.create_engine() as Arc<dyn ProtocolEngine>
    }

    fn create_engine(&self) -> Arc<MockEngine> {
        self.state.created.fetch_add(1, Ordering::SeqCst);
        let engine = Arc::new_cyclic(|me| MockEngine {
            plc: self.clone(),
            me: me.clone(),
            events: Mutex::new(None),
            connected: AtomicBool::new(false),
        });
        lock(&self.state.engines).push(Arc::downgrade(&engine));
        engine
    }

    // -- memory --

    pub fn set_word(&self, address: &str, value: u16) {
        lock(&self.state.memory).insert(key(address), value);
    }

    #[must_use]
    pub fn word(&self, address: &str) -> Option<u16> {
        lock(&self.state.memory).get(&key(address)).copied()
    }

    // -- faults --

    /// Every connection attempt reports `Error(message)`.
    pub fn refuse_connections(&self, message: impl Into<String>) {
        lock(&self.state.faults).refuse = Some(message.into());
    }

    /// `open` itself returns an error.
    pub fn reject_open(&self, message: impl Into<String>) {
        lock(&self.state.faults).reject_open = Some(message.into());
    }

    /// Attempts never report anything.
    pub fn stall_connections(&self) {
        lock(&self.state.faults).never_open = true;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        lock(&self.state.faults).open_delay = delay;
    }

    /// `drop_connection` succeeds but no `Close` event follows.
    pub fn silence_close(&self) {
        lock(&self.state.faults).silent_close = true;
    }

    pub fn fail_read(&self, address: &str, message: impl Into<String>) {
        lock(&self.state.faults)
            .read_errors
            .insert(key(address), message.into());
    }

    pub fn fail_write(&self, address: &str, message: impl Into<String>) {
        lock(&self.state.faults)
            .write_errors
            .insert(key(address), message.into());
    }

    /// Requests for `address` are accepted but never answered.
    pub fn hang(&self, address: &str) {
        lock(&self.state.faults).hang.insert(key(address));
    }

    /// Answer every parked request now. Callers that already timed out
    /// never see these answers.
    pub fn release_hung(&self) -> usize {
        let reads = std::mem::take(&mut *lock(&self.state.parked_reads));
        let writes = std::mem::take(&mut *lock(&self.state.parked_writes));
        let n = reads.len() + writes.len();
        for r in reads {
            let _ = r.send(Ok(ReadData::new(0)));
        }
        for w in writes {
            let _ = w.send(Ok(()));
        }
        n
    }

    pub fn clear_faults(&self) {
        *lock(&self.state.faults) = Faults::default();
    }

    /// Close every live connection from the PLC side.
    pub fn close_from_peer(&self) {
        for engine in self.live_engines() {
            engine.close();
        }
    }

    // -- observation --

    #[must_use]
    pub fn engines_created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.live_engines()
            .iter()
            .filter(|e| e.connected.load(Ordering::SeqCst))
            .count()
    }

    #[must_use]
    pub fn ops(&self) -> Vec<Op> {
        lock(&self.state.ops).clone()
    }

    pub fn clear_ops(&self) {
        lock(&self.state.ops).clear();
    }

    /// Addresses read so far, in order.
    #[must_use]
    pub fn reads(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Read(a) => Some(a),
                Op::Write(..) => None,
            })
            .collect()
    }

    /// Options passed to the most recent `open`.
    #[must_use]
    pub fn last_options(&self) -> Option<EngineOptions> {
        lock(&self.state.last_options).clone()
    }

    fn live_engines(&self) -> Vec<Arc<MockEngine>> {
        let mut engines = lock(&self.state.engines);
        engines.retain(|w| w.strong_count() > 0);
        engines.iter().filter_map(Weak::upgrade).collect()
    }
}

pub struct MockEngine {
    plc: MockPlc,
    me: Weak<MockEngine>,
    events: Mutex<Option<EventSender>>,
    connected: AtomicBool,
}

impl MockEngine {
    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = lock(&self.events).as_ref() {
            let _ = tx.send(event);
        }
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::debug!("mock connection closed");
            self.emit(EngineEvent::Close);
        }
        lock(&self.events).take();
    }
}

impl ProtocolEngine for MockEngine {
    fn open(&self, options: &EngineOptions, events: EventSender) -> Result<(), EngineError> {
        let state = &self.plc.state;
        *lock(&state.last_options) = Some(options.clone());
        let (reject, refuse, never_open, delay) = {
            let f = lock(&state.faults);
            (
                f.reject_open.clone(),
                f.refuse.clone(),
                f.never_open,
                f.open_delay,
            )
        };
        if let Some(message) = reject {
            return Err(EngineError::msg(message));
        }
        *lock(&self.events) = Some(events.clone());
        if never_open {
            tracing::debug!(host = %options.host, port = options.port, "mock open stalled");
            return Ok(());
        }

        let engine = self.me.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match refuse {
                Some(message) => {
                    let _ = events.send(EngineEvent::Error(message));
                }
                None => {
                    if let Some(engine) = engine.upgrade() {
                        engine.connected.store(true, Ordering::SeqCst);
                    }
                    let _ = events.send(EngineEvent::Open);
                }
            }
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn read_items(&self, address: &str, reply: ReadReply) {
        let state = &self.plc.state;
        let k = key(address);
        lock(&state.ops).push(Op::Read(k.clone()));
        if !self.is_connected() {
            let _ = reply.send(Err(EngineError::NotConnected));
            return;
        }
        let (hang, error) = {
            let f = lock(&state.faults);
            (f.hang.contains(&k), f.read_errors.get(&k).cloned())
        };
        if hang {
            tracing::debug!(address = %k, "mock read parked");
            lock(&state.parked_reads).push(reply);
            return;
        }
        let answer = match error {
            Some(message) => Err(EngineError::msg(message)),
            None => Ok(ReadData::new(lock(&state.memory).get(&k).copied().unwrap_or(0))),
        };
        tracing::trace!(address = %k, ?answer, "mock read");
        let _ = reply.send(answer);
    }

    fn write_items(&self, address: &str, value: u16, reply: WriteReply) {
        let state = &self.plc.state;
        let k = key(address);
        lock(&state.ops).push(Op::Write(k.clone(), value));
        if !self.is_connected() {
            let _ = reply.send(Err(EngineError::NotConnected));
            return;
        }
        let (hang, error) = {
            let f = lock(&state.faults);
            (f.hang.contains(&k), f.write_errors.get(&k).cloned())
        };
        if hang {
            tracing::debug!(address = %k, "mock write parked");
            lock(&state.parked_writes).push(reply);
            return;
        }
        let answer = match error {
            Some(message) => Err(EngineError::msg(message)),
            None => {
                lock(&state.memory).insert(k.clone(), value);
                Ok(())
            }
        };
        tracing::trace!(address = %k, value, ?answer, "mock write");
        let _ = reply.send(answer);
    }

    fn drop_connection(&self) -> Result<(), EngineError> {
        let silent = lock(&self.plc.state.faults).silent_close;
        if silent {
            self.connected.store(false, Ordering::SeqCst);
            return Ok(());
        }
        self.close();
        Ok(())
    }
}
