//! End-to-end tests over a real socket.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use taskhub_core::{NotificationEvent, NotificationKind, UserId};
use taskhub_server::{Services, TaskhubServer};
use taskhub_settings::{ServerSettings, TaskhubSettings};
use taskhub_store::{SqliteStore, new_in_memory};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct Harness {
    services: Services,
    base: String,
    cancel: CancellationToken,
    handle: taskhub_server::ServerHandle,
}

async fn boot() -> Harness {
    let mut settings = TaskhubSettings::default();
    settings.scheduler.enabled = false;
    settings.server = ServerSettings {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerSettings::default()
    };

    let store = SqliteStore::open(new_in_memory().unwrap()).unwrap();
    let services = Services::build(settings.clone(), store).unwrap();
    let cancel = CancellationToken::new();
    services.start(&cancel).unwrap();

    let server = TaskhubServer::new(settings.server, services.hub().clone(), None);
    let handle = server.listen(cancel.clone()).await.unwrap();
    let base = handle.local_addr().to_string();
    Harness {
        services,
        base,
        cancel,
        handle,
    }
}

async fn connect(base: &str, user: &str) -> WsStream {
    let mut req = format!("ws://{base}/ws").into_client_request().unwrap();
    let _ = req.headers_mut().insert("x-user-id", user.parse().unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(req).await.unwrap();
    ws
}

/// Next text frame as JSON, skipping control frames.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn notification_reaches_every_connection_of_the_user() {
    let h = boot().await;
    let mut phone = connect(&h.base, "alice").await;
    let mut laptop = connect(&h.base, "alice").await;
    let mut bob = connect(&h.base, "bob").await;
    for ws in [&mut phone, &mut laptop, &mut bob] {
        let hello = read_json(ws).await;
        assert_eq!(hello["type"], "connection.established");
        assert!(hello["data"]["connectionId"].is_string());
    }
    assert_eq!(h.services.hub().user_connection_count(&UserId::from("alice")), 2);

    let event = NotificationEvent::new(NotificationKind::TaskAssigned, UserId::from("alice"))
        .with_meta("task_id", "report");
    let id = event.id.to_string();
    for handle in h.services.notifications().notify(event).await {
        assert!(handle.await.unwrap().is_delivered());
    }

    for ws in [&mut phone, &mut laptop] {
        let frame = read_json(ws).await;
        assert_eq!(frame["id"], id.as_str());
        assert_eq!(frame["type"], "task_assigned");
        assert_eq!(frame["metadata"]["task_id"], "report");
        let count = read_json(ws).await;
        assert_eq!(count["type"], "notification.unread_count");
        assert_eq!(count["data"]["count"], 1);
    }

    // Bob only sees an application pong.
    bob.send(Message::text(r#"{"type":"ping"}"#)).await.unwrap();
    assert_eq!(read_json(&mut bob).await["type"], "pong");
}

#[tokio::test]
async fn upgrade_without_identity_is_refused() {
    let h = boot().await;
    let resp = reqwest::get(format!("http://{}/ws", h.base)).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    let err = tokio_tungstenite::connect_async(format!("ws://{}/ws", h.base))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn health_counts_live_connections() {
    let h = boot().await;
    let mut ws = connect(&h.base, "alice").await;
    let _ = read_json(&mut ws).await;

    let health: Value = reqwest::get(format!("http://{}/health", h.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
}

#[tokio::test]
async fn disconnect_unregisters() {
    let h = boot().await;
    let mut ws = connect(&h.base, "alice").await;
    let _ = read_json(&mut ws).await;
    ws.close(None).await.unwrap();

    timeout(TIMEOUT, async {
        while h.services.hub().connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection removed");
}

#[tokio::test]
async fn shutdown_closes_sockets_and_stops_listener() {
    let h = boot().await;
    let mut ws = connect(&h.base, "alice").await;
    let _ = read_json(&mut ws).await;

    h.cancel.cancel();
    h.handle.stopped().await.unwrap();
    h.services.shutdown().await;

    // The server closes the socket; the stream ends after the close frame.
    let closed = timeout(TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                break;
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    assert_eq!(h.services.hub().connection_count(), 0);
    assert!(!h.services.hub().is_accepting());
}
