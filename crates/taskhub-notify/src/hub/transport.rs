//! Transport boundary between the hub and an upgraded client socket.
//!
//! The hub never sees WebSocket types. The server adapts Axum sockets to
//! [`FrameSink`]/[`FrameSource`]; [`super::memory`] provides an in-process
//! pair.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Frame written to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Text(Arc<str>),
    /// Transport-level liveness probe.
    Ping,
}

/// Frame read from a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Text frame.
    Text(String),
    /// Transport ping.
    Ping,
    /// Transport pong.
    Pong,
    /// The client is closing.
    Close,
}

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer went away.
    #[error("transport closed")]
    Closed,
    /// I/O or protocol error.
    #[error("transport error: {0}")]
    Io(String),
}

/// Write half of a client transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame. May wait for the peer to accept it.
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError>;

    /// Close the transport.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a client transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` once the peer is gone.
    async fn next(&mut self) -> Option<Result<Inbound, TransportError>>;
}

/// An authenticated, upgraded client transport.
pub struct TransportHandle {
    /// Write half.
    pub sink: Box<dyn FrameSink>,
    /// Read half.
    pub source: Box<dyn FrameSource>,
}

impl TransportHandle {
    /// Bundle the two halves.
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}
