//! `GET /ws` upgrade handler.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use taskhub_core::UserId;
use tracing::{debug, warn};

use super::transport::into_transport;
use crate::metrics::WS_UPGRADES_REJECTED_TOTAL;
use crate::server::AppState;

/// Header carrying the user identity set by the authenticating proxy.
pub const USER_HEADER: &str = "x-user-id";

/// The authenticated user, if the proxy supplied one.
pub fn user_from_headers(headers: &HeaderMap) -> Option<UserId> {
    let value = headers.get(USER_HEADER)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| UserId::from(value))
}

fn reject(status: StatusCode, reason: &'static str) -> Response {
    counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => reason).increment(1);
    (status, reason).into_response()
}

/// Upgrade an authenticated request and hand the socket to the hub.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if !state.hub.is_accepting() {
        return reject(StatusCode::SERVICE_UNAVAILABLE, "shutting_down");
    }
    let Some(user_id) = user_from_headers(&headers) else {
        return reject(StatusCode::UNAUTHORIZED, "unauthenticated");
    };
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(error = %rejection, "not a websocket upgrade");
            counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "bad_upgrade").increment(1);
            return rejection.into_response();
        }
    };

    let hub = state.hub.clone();
    upgrade.on_upgrade(move |socket| async move {
        let transport = into_transport(socket);
        if let Err(e) = hub.register(user_id.clone(), transport) {
            warn!(user_id = %user_id, error = %e, "upgraded socket refused by hub");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn user_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_from_headers(&headers), None);

        let _ = headers.insert(USER_HEADER, HeaderValue::from_static("  "));
        assert_eq!(user_from_headers(&headers), None);

        let _ = headers.insert(USER_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(user_from_headers(&headers), Some(UserId::from("alice")));
    }
}
