//! Axum `WebSocket` as a hub transport.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use taskhub_notify::TransportHandle;
use taskhub_notify::hub::{FrameSink, FrameSource, Inbound, Outbound, TransportError};

struct WsSink(SplitSink<WebSocket, Message>);

struct WsSource(SplitStream<WebSocket>);

/// Split an upgraded socket into hub halves.
pub fn into_transport(socket: WebSocket) -> TransportHandle {
    let (sink, stream) = socket.split();
    TransportHandle::new(WsSink(sink), WsSource(stream))
}

fn outbound(frame: Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::Text(text.as_ref().into()),
        Outbound::Ping => Message::Ping(Bytes::new()),
    }
}

fn inbound(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => Inbound::Text(String::from_utf8_lossy(&bytes).into_owned()),
        Message::Ping(_) => Inbound::Ping,
        Message::Pong(_) => Inbound::Pong,
        Message::Close(_) => Inbound::Close,
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError> {
        self.0
            .send(outbound(frame))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next(&mut self) -> Option<Result<Inbound, TransportError>> {
        let message = self.0.next().await?;
        Some(message.map(inbound).map_err(|e| TransportError::Io(e.to_string())))
    }
}
