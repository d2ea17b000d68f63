//! Protocol engine abstraction.
//!
//! The engine owns the wire protocol (framing, sockets, PLC addressing). The
//! registry drives its lifecycle through `open` and listens for
//! [`EngineEvent`]s; the client issues elementary word operations through
//! `read_items` / `write_items`, each answered once on a `oneshot` reply.
//!
//! Replies are fire-and-forget from the engine's point of view: when the
//! caller has already timed out, `send` on the reply fails and the late
//! answer is discarded. Engines never need to support cancellation.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::EngineOptions;
use crate::error::EngineError;

/// Lifecycle notification. Each is sent at most once per transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Connection ready for word operations.
    Open,
    /// Connection attempt (or established link) failed.
    Error(String),
    /// Connection ended, peer- or locally initiated.
    Close,
}

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Value returned by one elementary read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadData {
    pub value: u16,
    /// Engine-reported quality; `None` means good.
    pub quality: Option<String>,
}

impl ReadData {
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self {
            value,
            quality: None,
        }
    }
}

pub type ReadReply = oneshot::Sender<Result<ReadData, EngineError>>;
pub type WriteReply = oneshot::Sender<Result<(), EngineError>>;

pub trait ProtocolEngine: Send + Sync {
    /// Start connecting. Progress is reported on `events`; an `Err` here
    /// means the attempt could not even be started.
    fn open(&self, options: &EngineOptions, events: EventSender) -> Result<(), EngineError>;

    fn is_connected(&self) -> bool;

    /// Read one word at `address` and answer on `reply`.
    fn read_items(&self, address: &str, reply: ReadReply);

    /// Write one word at `address` and answer on `reply`.
    fn write_items(&self, address: &str, value: u16, reply: WriteReply);

    /// Begin closing. Completion is reported as [`EngineEvent::Close`].
    fn drop_connection(&self) -> Result<(), EngineError>;
}

/// Creates one engine instance per connection attempt.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Arc<dyn ProtocolEngine>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Arc<dyn ProtocolEngine> + Send + Sync,
{
    fn create(&self) -> Arc<dyn ProtocolEngine> {
        self()
    }
}
