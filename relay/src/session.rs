//! The `/tunnel` WebSocket handler: registration, response dispatch, and
//! the outbound ping timer.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{info, warn};
use tunnel_shared::{ClientFrame, ServerFrame, MAX_BODY_BYTES};

use crate::tunnel::OutboundMessage;
use crate::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_PINGS: u32 = 2;
const WRITER_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_LOCAL_PORT: u16 = 3000;

/// Non-blank header value, or `None` — the spec treats a blank hint the
/// same as an absent one.
fn header_hint(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let subdomain_hint = header_hint(&headers, "x-subdomain");
    let local_port = headers
        .get("x-local-port")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(DEFAULT_LOCAL_PORT);

    ws.max_message_size(MAX_BODY_BYTES)
        .max_frame_size(MAX_BODY_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, state, subdomain_hint, local_port))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    subdomain_hint: Option<String>,
    local_port: u16,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(WRITER_CHANNEL_CAPACITY);

    // Single writer task: every task that wants to speak to this tunnel
    // goes through `tx`, never touches `sink` directly.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let sent = match msg {
                OutboundMessage::Text(text) => sink.send(Message::Text(text.into())).await,
                OutboundMessage::Close(code) => {
                    let _ = sink
                        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                            code,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
            };
            if sent.is_err() {
                break;
            }
        }
    });

    let mut tunnel: Option<std::sync::Arc<crate::tunnel::Tunnel>> = None;
    let mut ping_timer = interval(PING_INTERVAL);
    let mut missed_pings: u32 = 0;
    ping_timer.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Register { subdomain }) => {
                                // priority: message.subdomain, then the
                                // X-Subdomain header hint, then a generated
                                // label. A blank message.subdomain does not
                                // count as present.
                                let requested = subdomain
                                    .as_deref()
                                    .map(str::trim)
                                    .filter(|v| !v.is_empty())
                                    .map(str::to_string)
                                    .or_else(|| subdomain_hint.clone());
                                let registered = state
                                    .registry
                                    .register(requested.as_deref(), local_port, tx.clone())
                                    .await;
                                let url = state.config.public_url(&registered.subdomain);
                                info!(subdomain = %registered.subdomain, "tunnel registered");
                                let ready = ServerFrame::TunnelReady {
                                    url,
                                    subdomain: registered.subdomain.clone(),
                                    id: registered.id,
                                };
                                if let Ok(json) = serde_json::to_string(&ready) {
                                    if tx.send(OutboundMessage::Text(json)).await.is_err() {
                                        break;
                                    }
                                }
                                tunnel = Some(registered);
                            }
                            Ok(ClientFrame::Response { data }) => {
                                if let Some(t) = &tunnel {
                                    state.registry.handle_response(t, data);
                                }
                            }
                            Ok(ClientFrame::Pong) => {
                                missed_pings = 0;
                            }
                            Err(err) => {
                                warn!(%err, "dropping unparseable tunnel frame");
                                let notice = ServerFrame::Error {
                                    message: format!("malformed frame: {err}"),
                                };
                                if let Ok(json) = serde_json::to_string(&notice) {
                                    let _ = tx.send(OutboundMessage::Text(json)).await;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pings = 0;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(%err, "tunnel socket read error");
                        break;
                    }
                }
            }
            _ = ping_timer.tick() => {
                missed_pings += 1;
                if missed_pings > MAX_MISSED_PINGS {
                    warn!("tunnel missed {} consecutive pings", missed_pings);
                    break;
                }
                let ping = serde_json::to_string(&ServerFrame::Ping).unwrap();
                if tx.send(OutboundMessage::Text(ping)).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(t) = tunnel {
        state.registry.remove_by_channel(&t.subdomain, t.id, 1000).await;
        info!(subdomain = %t.subdomain, "tunnel session ended");
    }

    drop(tx);
    let _ = writer.await;
}
