//! WebSocket upgrade handler for match event streams

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::bus::{match_channel, Envelope};
use crate::http::middleware::verify_jwt;
use crate::util::rate_limit::SubscriberRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Buffered control frames (pongs, errors) per connection
const CONTROL_BUFFER: usize = 16;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// Upgrade to a stream of the match's bus channel
pub async fn events_handler(
    ws: WebSocketUpgrade,
    Path(match_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    match verify_jwt(&query.token, &state.config.supabase_jwt_secret) {
        Ok(claims) => {
            info!(match_id = %match_id, user_id = %claims.sub, "Event stream upgrade");
            ws.on_upgrade(move |socket| handle_socket(socket, match_id, claims.sub, state))
        }
        Err(e) => {
            warn!(match_id = %match_id, error = %e, "Event stream auth failed");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, match_id: Uuid, user_id: Uuid, state: AppState) {
    // Subscribe before the welcome so nothing published after it is missed
    let events = state.bus.subscribe(&match_channel(match_id));
    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        match_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        debug!(user_id = %user_id, error = %e, "Failed to send welcome");
        return;
    }

    run_session(match_id, user_id, ws_sink, ws_stream, events).await;

    info!(match_id = %match_id, user_id = %user_id, "Event stream closed");
}

/// Forward bus events to the socket and answer pings
async fn run_session(
    match_id: Uuid,
    user_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    mut events: broadcast::Receiver<Envelope>,
) {
    let rate_limiter = SubscriberRateLimiter::new();
    let (control_tx, mut control_rx) = mpsc::channel::<ServerMsg>(CONTROL_BUFFER);

    // Writer task: bus events and control replies -> WebSocket
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(envelope) => {
                        if let Err(e) = ws_sink.send(Message::Text(envelope.frame.to_string())).await {
                            debug!(user_id = %user_id, error = %e, "WebSocket send failed");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            match_id = %match_id,
                            user_id = %user_id,
                            lagged_count = n,
                            "Subscriber lagged, skipping {} events", n
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(match_id = %match_id, "Match channel closed");
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                Some(msg) = control_rx.recv() => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(user_id = %user_id, error = %e, "WebSocket send failed");
                        break;
                    }
                }
            }
        }
    });

    // Reader loop: pings and close
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(user_id = %user_id, "Rate limited stream message");
                    continue;
                }

                let reply = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Ping { t }) => ServerMsg::Pong { t },
                    Err(e) => ServerMsg::Error {
                        code: "bad_message".to_string(),
                        message: e.to_string(),
                    },
                };
                if control_tx.send(reply).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(user_id = %user_id, "Client initiated close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
