//! Per-connection read and write loops.
//!
//! The write loop owns the transport sink: it forwards queued frames in FIFO
//! order, sends heartbeat pings, and drains the queue on hub shutdown. The
//! read loop owns the source: any inbound frame marks the connection alive
//! and application pings are answered. Whichever loop exits first closes
//! the connection, which stops the other.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::{Connection, Enqueue};
use super::manager::ConnectionHub;
use super::transport::{FrameSink, FrameSource, Inbound, Outbound, TransportError};
use crate::metrics::HUB_HEARTBEAT_TIMEOUTS_TOTAL;

/// Reply to an application-level ping.
const PONG_FRAME: &str = r#"{"type":"pong"}"#;

/// Bound on closing a transport that stopped cooperating.
const SINK_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a connection left the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Removed through `unregister`.
    Unregistered,
    /// The peer hung up.
    PeerClosed,
    /// The transport failed.
    TransportError,
    /// No inbound frame within the heartbeat timeout.
    HeartbeatTimeout,
    /// The outbound queue overflowed.
    Overflow,
    /// Hub shutdown.
    Shutdown,
    /// A loop ended without recording a reason (panic).
    Aborted,
}

impl CloseReason {
    /// Metric/log label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::PeerClosed => "peer_closed",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Overflow => "overflow",
            Self::Shutdown => "shutdown",
            Self::Aborted => "aborted",
        }
    }
}

/// Removes the connection from the hub when a loop ends, unwinding included.
struct Deregister {
    hub: Arc<ConnectionHub>,
    conn: Arc<Connection>,
    reason: CloseReason,
}

impl Deregister {
    fn new(hub: Arc<ConnectionHub>, conn: Arc<Connection>) -> Self {
        Self {
            hub,
            conn,
            reason: CloseReason::Aborted,
        }
    }
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.conn.close();
        let _ = self.hub.remove(self.conn.id(), self.reason);
    }
}

/// Heartbeat timing for the write loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Forward queued frames to the sink until the connection closes.
pub(crate) async fn run_write_loop(
    hub: Arc<ConnectionHub>,
    conn: Arc<Connection>,
    mut rx: mpsc::Receiver<Arc<str>>,
    mut sink: Box<dyn FrameSink>,
    stopping: CancellationToken,
    heartbeat: Heartbeat,
) {
    let mut guard = Deregister::new(hub, conn.clone());

    let mut ping = time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;
            () = conn.closed() => break CloseReason::Unregistered,
            () = stopping.cancelled() => {
                drain(&conn, &mut rx, sink.as_mut()).await;
                break CloseReason::Shutdown;
            }
            msg = rx.recv() => {
                let Some(text) = msg else { break CloseReason::Unregistered };
                if let Err(e) = send_frame(&conn, sink.as_mut(), Outbound::Text(text)).await {
                    debug!(conn_id = %conn.id(), error = %e, "write failed");
                    break CloseReason::TransportError;
                }
            }
            _ = ping.tick() => {
                let silent = conn.last_seen_elapsed();
                if silent > heartbeat.timeout {
                    warn!(
                        conn_id = %conn.id(),
                        user_id = %conn.user_id(),
                        silent_secs = silent.as_secs(),
                        "client unresponsive, disconnecting"
                    );
                    counter!(HUB_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                    break CloseReason::HeartbeatTimeout;
                }
                if send_frame(&conn, sink.as_mut(), Outbound::Ping).await.is_err() {
                    break CloseReason::TransportError;
                }
            }
        }
    };

    let _ = time::timeout(SINK_CLOSE_TIMEOUT, sink.close()).await;
    guard.reason = reason;
}

/// Read inbound frames until the peer leaves or the connection closes.
pub(crate) async fn run_read_loop(
    hub: Arc<ConnectionHub>,
    conn: Arc<Connection>,
    mut source: Box<dyn FrameSource>,
) {
    let mut guard = Deregister::new(hub, conn.clone());

    let reason = loop {
        let next = tokio::select! {
            biased;
            () = conn.closed() => break CloseReason::Unregistered,
            next = source.next() => next,
        };
        match next {
            None | Some(Ok(Inbound::Close)) => break CloseReason::PeerClosed,
            Some(Err(e)) => {
                debug!(conn_id = %conn.id(), error = %e, "read failed");
                break CloseReason::TransportError;
            }
            Some(Ok(frame)) => {
                conn.mark_alive();
                if let Inbound::Text(text) = frame {
                    handle_text(&conn, &text);
                }
            }
        }
    };

    guard.reason = reason;
}

/// Clients do not drive mutations over this channel; only pings are
/// answered.
fn handle_text(conn: &Connection, text: &str) {
    let is_ping = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == "ping"))
        .unwrap_or(false);

    if is_ping {
        if conn.enqueue(Arc::from(PONG_FRAME)) == Enqueue::Full {
            debug!(conn_id = %conn.id(), "queue full, pong dropped");
        }
    } else {
        debug!(conn_id = %conn.id(), len = text.len(), "ignoring inbound client message");
    }
}

/// Send one frame, giving up as soon as the connection is closed.
async fn send_frame(
    conn: &Connection,
    sink: &mut dyn FrameSink,
    frame: Outbound,
) -> Result<(), TransportError> {
    tokio::select! {
        biased;
        () = conn.closed() => Err(TransportError::Closed),
        result = sink.send(frame) => result,
    }
}

/// Flush what is already queued; new frames are refused.
async fn drain(conn: &Connection, rx: &mut mpsc::Receiver<Arc<str>>, sink: &mut dyn FrameSink) {
    rx.close();
    let mut flushed = 0usize;
    while let Some(text) = rx.recv().await {
        if send_frame(conn, sink, Outbound::Text(text)).await.is_err() {
            break;
        }
        flushed += 1;
    }
    debug!(conn_id = %conn.id(), flushed, "queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reason_labels() {
        assert_eq!(CloseReason::Overflow.as_str(), "overflow");
        assert_eq!(CloseReason::HeartbeatTimeout.as_str(), "heartbeat_timeout");
        assert_eq!(CloseReason::PeerClosed.as_str(), "peer_closed");
    }

    #[tokio::test]
    async fn ping_text_gets_pong() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Connection::new(taskhub_core::UserId::from("u"), tx);
        handle_text(&conn, r#"{"type":"ping"}"#);
        handle_text(&conn, r#"{"type":"subscribe"}"#);
        handle_text(&conn, "not json");
        assert_eq!(&*rx.recv().await.unwrap(), PONG_FRAME);
        assert!(rx.try_recv().is_err());
    }
}
