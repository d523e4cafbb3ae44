//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::bus::{ConnectionId, MessageBus};
use crate::dispatch::Disposition;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::bus::Outgoing;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn = ConnectionId::new();
    info!(connection = %conn, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        connection_id: conn.0,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(connection = %conn, error = %e, "Failed to send welcome");
        return;
    }

    let outgoing = state.bus.register(conn);
    run_session(conn, &state, ws_sink, ws_stream, outgoing).await;

    state.bus.unregister(conn);
    state.session.leave(conn);

    info!(connection = %conn, "WebSocket connection closed");
}

/// Pump the socket: a writer task drains the bus queue while this task
/// feeds inbound frames to the session
async fn run_session(
    conn: ConnectionId,
    state: &AppState,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut outgoing: UnboundedReceiver<Outgoing>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            match frame {
                Outgoing::Text(json) => {
                    if let Err(e) = ws_sink.send(Message::Text(json)).await {
                        debug!(connection = %conn, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Outgoing::Close => {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => {
                debug!(connection = %conn, "Writer finished");
                break;
            }
            frame = ws_stream.next() => {
                let Some(frame) = frame else { break };
                let keep_open = match frame {
                    Ok(Message::Text(text)) => on_text(conn, state, &rate_limiter, &text),
                    Ok(Message::Binary(_)) => {
                        warn!(connection = %conn, "Received binary message, ignoring");
                        true
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => true,
                    Ok(Message::Close(_)) => {
                        info!(connection = %conn, "Client initiated close");
                        false
                    }
                    Err(e) => {
                        error!(connection = %conn, error = %e, "WebSocket error");
                        false
                    }
                };
                if !keep_open {
                    break;
                }
            }
        }
    }

    writer.abort();
}

/// Returns false once the connection should be torn down
fn on_text(conn: ConnectionId, state: &AppState, limiter: &ConnectionRateLimiter, text: &str) -> bool {
    if !limiter.check() {
        warn!(connection = %conn, "Rate limited input message");
        return true;
    }

    let msg = match serde_json::from_str::<ClientMsg>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(connection = %conn, error = %e, "Failed to parse client message");
            return true;
        }
    };

    if let ClientMsg::Ping { t } = msg {
        state.bus.send(conn, &ServerMsg::Pong { t });
        return true;
    }

    state.session.handle_message(conn, &msg) != Disposition::Fatal
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
