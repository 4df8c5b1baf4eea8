//! WebSocket endpoint: admission, the per-connection receive loop and the
//! writer task that owns the socket's send half.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::proto::{parse_request, CommandResponse};
use crate::registry::{AdmissionError, Connection, Frame};
use crate::state::AppState;

pub const SHUTDOWN_REASON: &str = "Server shutting down";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    let remote = addr.ip().to_string();
    if let Err(e) = admit(&state, &remote, q.get("token").map(String::as_str)) {
        info!(addr = %remote, "connection refused: {e}");
        return rejection(&e);
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote))
}

/// Checks made before the upgrade, in order: token, origin, capacity.
/// The capacity check is repeated atomically when the client registers.
pub fn admit(state: &AppState, remote: &str, token: Option<&str>) -> Result<(), AdmissionError> {
    if let Some(expected) = state.auth_token.as_deref() {
        if token != Some(expected) {
            return Err(AdmissionError::Unauthorized);
        }
    }
    if !state.gate.is_origin_allowed(remote) {
        return Err(AdmissionError::OriginRejected(remote.to_string()));
    }
    if !state.gate.can_accept_connection() {
        return Err(AdmissionError::AtCapacity {
            max: state.registry().max_connections(),
        });
    }
    Ok(())
}

fn rejection(e: &AdmissionError) -> Response {
    let status = match e {
        AdmissionError::Unauthorized => StatusCode::UNAUTHORIZED,
        AdmissionError::OriginRejected(_) => StatusCode::FORBIDDEN,
        AdmissionError::AtCapacity { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AdmissionError::Duplicate(_) => StatusCode::CONFLICT,
    };
    (status, e.to_string()).into_response()
}

fn close_code_for(reason: &str) -> u16 {
    if reason == SHUTDOWN_REASON {
        close_code::AWAY
    } else {
        close_code::NORMAL
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState, remote: String) {
    let (conn, rx) = match state.gate.register_client(None, &remote) {
        Ok(r) => r,
        Err(e) => {
            // lost a race for the last slot
            warn!(addr = %remote, "admission failed after upgrade: {e}");
            let frame = CloseFrame {
                code: close_code::AGAIN,
                reason: e.to_string().into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
    };
    let id = conn.id().to_string();

    let hello = CommandResponse::ok("connected", state.processor.status_payload().await);
    let sent = match serde_json::to_string(&hello) {
        Ok(js) => socket.send(Message::Text(js)).await.is_ok(),
        Err(e) => {
            warn!(conn = %id, "failed to encode status: {e}");
            true
        }
    };
    if !sent {
        debug!(conn = %id, "client went away before the status message");
        state.gate.unregister_client(&id);
        conn.mark_closed();
        return;
    }
    conn.mark_open();

    let (sink, stream) = socket.split();
    let close_timeout = state.config.server.close_timeout();
    let writer = tokio::spawn(write_loop(sink, rx, Arc::clone(&conn), close_timeout));

    receive_loop(stream, &conn, &state).await;

    conn.close("Client disconnected");
    state.gate.unregister_client(&id);
    if let Err(e) = writer.await {
        warn!(conn = %id, "writer task failed: {e}");
    }
    conn.mark_closed();
    debug!(conn = %id, reason = conn.close_reason().unwrap_or(""), "connection closed");
}

/// Drains the outbound queue into the socket. Each send is bounded so a
/// stalled client cannot pin the task; the close frame is bounded the same way.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Frame>,
    conn: Arc<Connection>,
    close_timeout: Duration,
) {
    loop {
        tokio::select! {
            biased;
            _ = conn.closed() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let sent = timeout(close_timeout, sink.send(Message::Text(frame.to_string()))).await;
                if !matches!(sent, Ok(Ok(()))) {
                    debug!(conn = %conn.id(), "send failed");
                    conn.close("Send failed");
                    break;
                }
            }
        }
    }

    let reason = conn.close_reason().unwrap_or("Closing").to_string();
    let frame = CloseFrame {
        code: close_code_for(&reason),
        reason: reason.into(),
    };
    let _ = timeout(close_timeout, async {
        sink.send(Message::Close(Some(frame))).await?;
        sink.close().await
    })
    .await;
}

async fn receive_loop(mut stream: SplitStream<WebSocket>, conn: &Arc<Connection>, state: &AppState) {
    loop {
        let msg = tokio::select! {
            _ = conn.closed() => break,
            m = stream.next() => m,
        };
        let text = match msg {
            Some(Ok(Message::Text(t))) => t,
            Some(Ok(Message::Binary(b))) => match String::from_utf8(b) {
                Ok(t) => t,
                Err(_) => {
                    state.gate.update_activity(conn.id());
                    let reply = CommandResponse::fail("unknown", "Binary frames must contain UTF-8 JSON");
                    if !reply_to(conn, &reply).await {
                        break;
                    }
                    continue;
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {
                // ping/pong frames still count as activity
                state.gate.update_activity(conn.id());
                continue;
            }
            Some(Err(e)) => {
                debug!(conn = %conn.id(), "receive error: {e}");
                break;
            }
        };
        let reply = handle_text(state, conn.id(), &text).await;
        if !reply_to(conn, &reply).await {
            break;
        }
    }
}

/// One inbound message through activity, rate limit, parse, validate and execute.
pub async fn handle_text(state: &AppState, conn_id: &str, text: &str) -> CommandResponse {
    state.gate.update_activity(conn_id);
    if state.gate.is_rate_limited(conn_id) {
        let name = parse_request(text)
            .map(|r| r.command.trim().to_ascii_lowercase())
            .unwrap_or_else(|_| "unknown".to_string());
        debug!(conn = %conn_id, command = %name, "rate limited");
        return CommandResponse::fail(name, "Rate limit exceeded");
    }
    let request = match parse_request(text) {
        Ok(r) => r,
        Err(e) => return CommandResponse::fail("unknown", e),
    };
    let validation = state.gate.validate_command(&request);
    if let Some(w) = &validation.warning {
        warn!(conn = %conn_id, "{w}");
    }
    state.processor.execute(&validation, &request).await
}

async fn reply_to(conn: &Connection, reply: &CommandResponse) -> bool {
    match serde_json::to_string(reply) {
        Ok(js) => conn.send(Frame::from(js)).await,
        Err(e) => {
            warn!(conn = %conn.id(), "failed to encode reply: {e}");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn state_with(mutate: impl FnOnce(&mut AgentConfig)) -> AppState {
        let mut cfg = AgentConfig::default();
        mutate(&mut cfg);
        AppState::for_tests(cfg)
    }

    #[test]
    fn admission_order() {
        let state = state_with(|c| {
            c.server.auth_token = Some("t0k".into());
            c.server.max_connections = 1;
        });
        assert_eq!(
            admit(&state, "8.8.8.8", None),
            Err(AdmissionError::Unauthorized)
        );
        assert_eq!(
            admit(&state, "8.8.8.8", Some("t0k")),
            Err(AdmissionError::OriginRejected("8.8.8.8".into()))
        );
        assert_eq!(admit(&state, "192.168.1.4", Some("t0k")), Ok(()));

        let _held = state.gate.register_client(None, "127.0.0.1").unwrap();
        assert_eq!(
            admit(&state, "127.0.0.1", Some("t0k")),
            Err(AdmissionError::AtCapacity { max: 1 })
        );
    }

    #[test]
    fn rejection_statuses() {
        assert_eq!(rejection(&AdmissionError::Unauthorized).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            rejection(&AdmissionError::OriginRejected("x".into())).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            rejection(&AdmissionError::AtCapacity { max: 1 }).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn text_pipeline() {
        let state = state_with(|c| c.server.rate_limit_per_minute = 3);
        let (conn, _rx) = state.gate.register_client(None, "127.0.0.1").unwrap();
        let id = conn.id().to_string();

        let r = handle_text(&state, &id, r#"{"command":"Ping"}"#).await;
        assert!(r.success);
        assert_eq!(r.command, "ping");

        let r = handle_text(&state, &id, "not json").await;
        assert!(!r.success);
        assert!(r.error.unwrap().starts_with("Malformed message"));

        let r = handle_text(&state, &id, r#"{"command":"reboot"}"#).await;
        assert!(!r.success);

        let r = handle_text(&state, &id, r#"{"command":"ping"}"#).await;
        assert_eq!(r.error.as_deref(), Some("Rate limit exceeded"));
        assert_eq!(r.command, "ping");
    }

    #[test]
    fn shutdown_uses_going_away() {
        assert_eq!(close_code_for(SHUTDOWN_REASON), close_code::AWAY);
        assert_eq!(close_code_for("Idle timeout"), close_code::NORMAL);
    }
}
