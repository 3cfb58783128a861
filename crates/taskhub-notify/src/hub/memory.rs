//! In-memory transport for in-process clients and tests.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::transport::{FrameSink, FrameSource, Inbound, Outbound, TransportError, TransportHandle};

/// Factory for connected hub/client transport pairs.
pub struct MemoryTransport;

impl MemoryTransport {
    /// Create a connected pair.
    ///
    /// `capacity` bounds the frames in flight toward the client. A client
    /// that stops reading makes the hub side's `send` wait once it is full.
    pub fn pair(capacity: usize) -> (TransportHandle, MemoryClient) {
        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(64);
        let handle = TransportHandle::new(MemorySink { tx: Some(out_tx) }, MemorySource { rx: in_rx });
        let client = MemoryClient {
            rx: out_rx,
            tx: Some(in_tx),
        };
        (handle, client)
    }
}

struct MemorySink {
    tx: Option<mpsc::Sender<Outbound>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::Receiver<Inbound>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next(&mut self) -> Option<Result<Inbound, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

/// Client end of a [`MemoryTransport`] pair.
pub struct MemoryClient {
    rx: mpsc::Receiver<Outbound>,
    tx: Option<mpsc::Sender<Inbound>>,
}

impl MemoryClient {
    /// Next frame from the hub, `None` once the hub closed the transport.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Next text frame, skipping pings.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await? {
                Outbound::Text(text) => return Some(text.to_string()),
                Outbound::Ping => {}
            }
        }
    }

    /// Next text frame parsed as JSON, skipping pings.
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// A frame already waiting, without blocking.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }

    /// Send a frame to the hub. Returns `false` once the hub stopped reading.
    pub async fn send(&self, frame: Inbound) -> bool {
        match &self.tx {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    /// Send a text frame to the hub.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Inbound::Text(text.into())).await
    }

    /// Hang up: the hub sees end-of-stream.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }
}
