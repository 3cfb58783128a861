//! Connection registry and per-user routing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde_json::json;
use taskhub_core::{ConnectionId, NotificationEvent, UserId};
use taskhub_settings::HubSettings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::connection::{Connection, Enqueue};
use super::session::{self, CloseReason, Heartbeat};
use super::transport::TransportHandle;
use crate::errors::HubError;
use crate::metrics::{
    HUB_CONNECTIONS_ACTIVE, HUB_CONNECTIONS_CLOSED_TOTAL, HUB_CONNECTIONS_OPENED_TOTAL,
    HUB_FRAMES_QUEUED_TOTAL, HUB_OVERFLOW_DISCONNECTS_TOTAL,
};

/// Wait for loops to notice a forced close after the drain grace ran out.
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Registry {
    by_user: HashMap<UserId, HashMap<ConnectionId, Arc<Connection>>>,
    owners: HashMap<ConnectionId, UserId>,
}

impl Registry {
    fn insert(&mut self, conn: Arc<Connection>) {
        let _ = self.owners.insert(conn.id().clone(), conn.user_id().clone());
        let _ = self
            .by_user
            .entry(conn.user_id().clone())
            .or_default()
            .insert(conn.id().clone(), conn);
    }

    fn remove(&mut self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let user = self.owners.remove(id)?;
        let conns = self.by_user.get_mut(&user)?;
        let conn = conns.remove(id);
        if conns.is_empty() {
            let _ = self.by_user.remove(&user);
        }
        conn
    }

    fn user(&self, user_id: &UserId) -> Vec<Arc<Connection>> {
        self.by_user
            .get(user_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    fn all(&self) -> Vec<Arc<Connection>> {
        self.by_user.values().flat_map(|c| c.values().cloned()).collect()
    }
}

/// Routes notifications to every live connection of a user.
///
/// Each registered connection gets a write loop and a read loop on the
/// hub's task tracker. Sends never wait on a client: a full queue
/// disconnects that connection.
pub struct ConnectionHub {
    settings: HubSettings,
    registry: RwLock<Registry>,
    accepting: AtomicBool,
    stopping: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectionHub {
    /// Create a hub.
    pub fn new(settings: HubSettings) -> Arc<Self> {
        Arc::new(Self {
            settings,
            registry: RwLock::new(Registry::default()),
            accepting: AtomicBool::new(true),
            stopping: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    /// Add a connection for `user_id` and start its loops.
    pub fn register(
        self: &Arc<Self>,
        user_id: UserId,
        transport: TransportHandle,
    ) -> Result<Arc<Connection>, HubError> {
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let conn = Arc::new(Connection::new(user_id, tx));
        let _ = conn.enqueue(established_frame(conn.id()));

        {
            let mut registry = self.registry.write();
            if !self.accepting.load(Ordering::Acquire) {
                return Err(HubError::ShuttingDown);
            }
            registry.insert(conn.clone());
        }
        counter!(HUB_CONNECTIONS_OPENED_TOTAL).increment(1);
        gauge!(HUB_CONNECTIONS_ACTIVE).increment(1.0);

        let heartbeat = Heartbeat {
            interval: self.settings.heartbeat_interval(),
            timeout: self.settings.heartbeat_timeout(),
        };
        let TransportHandle { sink, source } = transport;
        let _ = self.tracker.spawn(session::run_write_loop(
            self.clone(),
            conn.clone(),
            rx,
            sink,
            self.stopping.clone(),
            heartbeat,
        ));
        let _ = self
            .tracker
            .spawn(session::run_read_loop(self.clone(), conn.clone(), source));

        info!(conn_id = %conn.id(), user_id = %conn.user_id(), "connection registered");
        Ok(conn)
    }

    /// Remove a connection and close it. Returns `false` if it was not
    /// registered.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.remove(id, CloseReason::Unregistered)
    }

    pub(crate) fn remove(&self, id: &ConnectionId, reason: CloseReason) -> bool {
        let removed = self.registry.write().remove(id);
        let Some(conn) = removed else {
            return false;
        };
        conn.close();
        counter!(HUB_CONNECTIONS_CLOSED_TOTAL, "reason" => reason.as_str()).increment(1);
        gauge!(HUB_CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            conn_id = %id,
            user_id = %conn.user_id(),
            reason = reason.as_str(),
            age_secs = conn.age().as_secs(),
            dropped = conn.drop_count(),
            "connection removed"
        );
        true
    }

    /// Queue `event` on every live connection of `user_id`.
    ///
    /// Returns whether at least one connection accepted it.
    pub fn send_to_user(&self, user_id: &UserId, event: &NotificationEvent) -> bool {
        match encode(event) {
            Some(frame) => self.send_frame_to_user(user_id, frame),
            None => false,
        }
    }

    /// Queue a pre-encoded frame on every live connection of `user_id`.
    pub fn send_frame_to_user(&self, user_id: &UserId, frame: impl Into<Arc<str>>) -> bool {
        if !self.is_accepting() {
            return false;
        }
        let targets = self.registry.read().user(user_id);
        if targets.is_empty() {
            debug!(user_id = %user_id, "no live connection for user");
            return false;
        }
        self.deliver(&targets, &frame.into()) > 0
    }

    /// Queue `event` on every connection. Returns how many accepted it.
    pub fn broadcast(&self, event: &NotificationEvent) -> usize {
        if !self.is_accepting() {
            return 0;
        }
        let Some(frame) = encode(event) else {
            return 0;
        };
        let targets = self.registry.read().all();
        self.deliver(&targets, &frame)
    }

    fn deliver(&self, targets: &[Arc<Connection>], frame: &Arc<str>) -> usize {
        let mut accepted = 0usize;
        for conn in targets {
            match conn.enqueue(frame.clone()) {
                Enqueue::Queued => accepted += 1,
                Enqueue::Full => self.disconnect_slow(conn),
                Enqueue::Closed => {}
            }
        }
        counter!(HUB_FRAMES_QUEUED_TOTAL).increment(accepted as u64);
        accepted
    }

    fn disconnect_slow(&self, conn: &Connection) {
        warn!(
            conn_id = %conn.id(),
            user_id = %conn.user_id(),
            capacity = self.settings.queue_capacity,
            "outbound queue full, disconnecting slow client"
        );
        counter!(HUB_OVERFLOW_DISCONNECTS_TOTAL).increment(1);
        conn.close();
        let _ = self.remove(conn.id(), CloseReason::Overflow);
    }

    /// Whether new registrations are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.read().owners.len()
    }

    /// Live connections of one user.
    pub fn user_connection_count(&self, user_id: &UserId) -> usize {
        self.registry.read().by_user.get(user_id).map_or(0, HashMap::len)
    }

    /// Users with at least one live connection.
    pub fn connected_users(&self) -> Vec<UserId> {
        self.registry.read().by_user.keys().cloned().collect()
    }

    /// Stop accepting, let write loops drain their queues within the grace
    /// period, then force-close whatever is left.
    pub async fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!(connections = self.connection_count(), "connection hub shutting down");
        }
        self.stopping.cancel();
        self.tracker.close();

        let grace = self.settings.shutdown_grace();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            let remaining = self.registry.read().all();
            warn!(
                remaining = remaining.len(),
                grace_ms = self.settings.shutdown_grace_ms,
                "drain grace elapsed, force-closing connections"
            );
            for conn in &remaining {
                conn.close();
            }
            if tokio::time::timeout(FORCE_CLOSE_WAIT, self.tracker.wait())
                .await
                .is_err()
            {
                error!("connection loops still running after force close");
            }
        }

        let leftovers: Vec<ConnectionId> = self.registry.read().owners.keys().cloned().collect();
        for id in leftovers {
            let _ = self.remove(&id, CloseReason::Shutdown);
        }
        info!("connection hub stopped");
    }

    /// Wait for `cancel`, then shut down.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        cancel.cancelled().await;
        self.shutdown().await;
    }
}

fn encode(event: &NotificationEvent) -> Option<Arc<str>> {
    match event.to_wire().to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!(event_id = %event.id, error = %e, "failed to encode notification");
            None
        }
    }
}

fn established_frame(id: &ConnectionId) -> Arc<str> {
    let frame = json!({
        "type": "connection.established",
        "data": { "connectionId": id.as_str() },
    });
    Arc::from(frame.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::memory::{MemoryClient, MemoryTransport};
    use crate::hub::transport::{FrameSink, Inbound, Outbound, TransportError};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use taskhub_core::NotificationKind;

    fn settings(queue_capacity: usize) -> HubSettings {
        HubSettings {
            queue_capacity,
            heartbeat_interval_ms: 1_000,
            heartbeat_timeout_ms: 3_000,
            shutdown_grace_ms: 200,
        }
    }

    fn event(user: &str, title: &str) -> NotificationEvent {
        NotificationEvent::new(NotificationKind::TaskAssigned, UserId::from(user)).with_title(title)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn connect(hub: &Arc<ConnectionHub>, user: &str) -> (Arc<Connection>, MemoryClient) {
        let (handle, mut client) = MemoryTransport::pair(64);
        let conn = hub.register(UserId::from(user), handle).unwrap();
        let hello = client.recv_json().await.unwrap();
        assert_eq!(hello["type"], "connection.established");
        assert_eq!(hello["data"]["connectionId"], conn.id().as_str());
        (conn, client)
    }

    #[tokio::test]
    async fn register_tracks_connections() {
        let hub = ConnectionHub::new(settings(8));
        let (_c1, _k1) = connect(&hub, "alice").await;
        let (_c2, _k2) = connect(&hub, "alice").await;
        let (_c3, _k3) = connect(&hub, "bob").await;

        assert_eq!(hub.connection_count(), 3);
        assert_eq!(hub.user_connection_count(&UserId::from("alice")), 2);
        assert_eq!(hub.user_connection_count(&UserId::from("carol")), 0);
        let mut users: Vec<String> = hub.connected_users().iter().map(ToString::to_string).collect();
        users.sort();
        assert_eq!(users, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn send_reaches_every_connection_of_user() {
        let hub = ConnectionHub::new(settings(8));
        let (_a1, mut k1) = connect(&hub, "alice").await;
        let (_a2, mut k2) = connect(&hub, "alice").await;
        let (_b, mut kb) = connect(&hub, "bob").await;

        assert!(hub.send_to_user(&UserId::from("alice"), &event("alice", "hello")));

        for client in [&mut k1, &mut k2] {
            let wire = client.recv_json().await.unwrap();
            assert_eq!(wire["type"], "task_assigned");
            assert_eq!(wire["title"], "hello");
        }
        settle().await;
        assert!(kb.try_recv().is_none());
    }

    #[tokio::test]
    async fn send_to_offline_user_is_false() {
        let hub = ConnectionHub::new(settings(8));
        assert!(!hub.send_to_user(&UserId::from("ghost"), &event("ghost", "x")));
    }

    #[tokio::test]
    async fn broadcast_counts_accepting_connections() {
        let hub = ConnectionHub::new(settings(8));
        let (_a, mut ka) = connect(&hub, "alice").await;
        let (_b, mut kb) = connect(&hub, "bob").await;

        assert_eq!(hub.broadcast(&event("all", "maintenance")), 2);
        assert_eq!(ka.recv_json().await.unwrap()["title"], "maintenance");
        assert_eq!(kb.recv_json().await.unwrap()["title"], "maintenance");
    }

    #[tokio::test]
    async fn per_connection_order_is_preserved() {
        let hub = ConnectionHub::new(settings(8));
        let (_a, mut client) = connect(&hub, "alice").await;
        let user = UserId::from("alice");

        for i in 0..50 {
            assert!(hub.send_to_user(&user, &event("alice", &format!("n{i}"))));
            settle().await;
        }
        for i in 0..50 {
            let wire = client.recv_json().await.unwrap();
            assert_eq!(wire["title"], format!("n{i}"));
        }
    }

    #[tokio::test]
    async fn slow_consumer_is_disconnected_without_stalling_others() {
        let hub = ConnectionHub::new(settings(2));

        // Never read: its transport holds one frame, the queue two more.
        let (slow_handle, _slow_client) = MemoryTransport::pair(1);
        let _slow = hub.register(UserId::from("slow"), slow_handle).unwrap();
        let (_fast, mut fast_client) = connect(&hub, "fast").await;

        let slow = UserId::from("slow");
        let fast = UserId::from("fast");
        for i in 0..10 {
            let _ = hub.send_to_user(&slow, &event("slow", &format!("s{i}")));
            assert!(hub.send_to_user(&fast, &event("fast", &format!("f{i}"))));
            settle().await;
        }

        assert_eq!(hub.user_connection_count(&slow), 0);
        assert!(!hub.send_to_user(&slow, &event("slow", "late")));
        for i in 0..10 {
            assert_eq!(fast_client.recv_json().await.unwrap()["title"], format!("f{i}"));
        }
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_closes_transport() {
        let hub = ConnectionHub::new(settings(8));
        let (conn, mut client) = connect(&hub, "alice").await;

        assert!(hub.unregister(conn.id()));
        assert!(!hub.unregister(conn.id()));
        assert!(conn.is_closed());
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(client.recv_text().await, None);
    }

    #[tokio::test]
    async fn client_disconnect_removes_connection() {
        let hub = ConnectionHub::new(settings(8));
        let (conn, mut client) = connect(&hub, "alice").await;

        client.disconnect();
        settle().await;
        assert!(conn.is_closed());
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn application_ping_gets_pong() {
        let hub = ConnectionHub::new(settings(8));
        let (_conn, mut client) = connect(&hub, "alice").await;

        assert!(client.send_text(r#"{"type":"ping"}"#).await);
        assert_eq!(client.recv_json().await.unwrap()["type"], "pong");
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_times_out() {
        let hub = ConnectionHub::new(settings(8));
        let (conn, mut client) = connect(&hub, "alice").await;

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_matches!(client.try_recv(), Some(Outbound::Ping));
        assert!(!conn.is_closed());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(conn.is_closed());
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_keep_connection_alive() {
        let hub = ConnectionHub::new(settings(8));
        let (conn, client) = connect(&hub, "alice").await;

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(900)).await;
            assert!(client.send(Inbound::Pong).await);
        }
        assert!(!conn.is_closed());
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_frames() {
        let hub = ConnectionHub::new(settings(16));
        let (_conn, mut client) = connect(&hub, "alice").await;
        let user = UserId::from("alice");

        for i in 0..5 {
            assert!(hub.send_to_user(&user, &event("alice", &format!("q{i}"))));
        }
        hub.shutdown().await;

        for i in 0..5 {
            assert_eq!(client.recv_json().await.unwrap()["title"], format!("q{i}"));
        }
        assert_eq!(client.recv_text().await, None);
        assert_eq!(hub.connection_count(), 0);

        let (handle, _client) = MemoryTransport::pair(4);
        assert_matches!(
            hub.register(user.clone(), handle),
            Err(HubError::ShuttingDown)
        );
        assert!(!hub.send_to_user(&user, &event("alice", "after")));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_force_closes_stuck_connections() {
        let hub = ConnectionHub::new(settings(16));
        let (handle, _client) = MemoryTransport::pair(1);
        let conn = hub.register(UserId::from("stuck"), handle).unwrap();
        for i in 0..5 {
            let _ = hub.send_to_user(&UserId::from("stuck"), &event("stuck", &format!("{i}")));
        }

        hub.shutdown().await;
        assert!(conn.is_closed());
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn run_shuts_down_on_cancel() {
        let hub = ConnectionHub::new(settings(8));
        let (_conn, mut client) = connect(&hub, "alice").await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(hub.clone().run(cancel.clone()));

        cancel.cancel();
        task.await.unwrap();
        assert!(!hub.is_accepting());
        assert_eq!(client.recv_text().await, None);
    }

    struct BrokenSink;

    #[async_trait]
    impl FrameSink for BrokenSink {
        async fn send(&mut self, _frame: Outbound) -> Result<(), TransportError> {
            Err(TransportError::Io("broken pipe".into()))
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn broken_transport_is_isolated() {
        let hub = ConnectionHub::new(settings(8));
        let (healthy_handle, _unused) = MemoryTransport::pair(4);
        let broken = TransportHandle {
            sink: Box::new(BrokenSink),
            source: healthy_handle.source,
        };
        let _broken = hub.register(UserId::from("broken"), broken).unwrap();
        let (_ok, mut client) = connect(&hub, "alice").await;
        settle().await;

        assert_eq!(hub.user_connection_count(&UserId::from("broken")), 0);
        assert!(hub.send_to_user(&UserId::from("alice"), &event("alice", "still here")));
        assert_eq!(client.recv_json().await.unwrap()["title"], "still here");
    }
}
