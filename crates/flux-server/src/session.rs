//! Per-connection lifecycle: `Connecting → Joined → Disconnected`.
//!
//! The `connected` ack is queued before the connection joins any room, so
//! it is always the first frame a client sees. The socket loop only moves
//! frames. Registry writes and all logging go through a per-session effects task fed by an
//! unbounded channel, so a slow side effect never stalls the socket while
//! effects for one client still run in lifecycle order.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use chrono::Utc;
use flux_core::emit::{user_room, workspace_room};
use flux_core::{CONNECTED, ClientFrame, ClientId, ConnectedAck, Frame, WorkspaceId};
use flux_settings::ServerSettings;
use flux_telemetry::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::auth::Identity;
use crate::connection::ClientConnection;
use crate::heartbeat::run_heartbeat;
use crate::registry::{ConnectionRecord, ConnectionRegistry};
use crate::rooms::RoomTable;

/// Shared state every session needs.
#[derive(Clone)]
pub struct SessionContext {
    /// Informational registry of live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Room membership used for fan-out.
    pub rooms: Arc<RoomTable>,
    /// Queue sizes and heartbeat timing.
    pub settings: Arc<ServerSettings>,
    /// Fired on server shutdown.
    pub shutdown: CancellationToken,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent a close frame.
    ClientClosed,
    /// Socket ended without a close frame.
    ClientGone,
    /// Reading from the socket failed.
    TransportError,
    /// Client stopped answering pings.
    HeartbeatTimeout,
    /// Client fell too far behind on outbound frames.
    SlowClient,
    /// Server is shutting down.
    ServerShutdown,
}

impl DisconnectReason {
    /// Label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::ClientGone => "client_gone",
            Self::TransportError => "transport_error",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::SlowClient => "slow_client",
            Self::ServerShutdown => "server_shutdown",
        }
    }

    /// Close frame the server sends, if it initiated the disconnect.
    pub fn close_frame(self) -> Option<CloseFrame> {
        let (code, reason) = match self {
            Self::ClientClosed | Self::ClientGone | Self::TransportError => return None,
            Self::HeartbeatTimeout => (close_code::POLICY, "heartbeat timeout"),
            Self::SlowClient => (close_code::AGAIN, "client too slow"),
            Self::ServerShutdown => (close_code::AWAY, "server shutting down"),
        };
        Some(CloseFrame {
            code,
            reason: reason.into(),
        })
    }
}

enum Effect {
    Joined(ConnectionRecord),
    ClientEvent(ClientFrame),
    Unreadable(String),
    Left {
        reason: DisconnectReason,
        room_size: usize,
        duration: Duration,
    },
}

/// Close a connection that arrived without an identity.
///
/// Nothing is joined or registered.
pub async fn reject_unauthenticated(mut ws: WebSocket, workspace_id: &WorkspaceId) {
    warn!(%workspace_id, "connection without identity, closing");
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: "unauthenticated".into(),
    };
    let _ = ws.send(Message::Close(Some(frame))).await;
}

/// Run one accepted websocket until it disconnects.
pub async fn run_session(
    ws: WebSocket,
    client_id: ClientId,
    workspace_id: WorkspaceId,
    identity: Identity,
    ctx: SessionContext,
) {
    let span = info_span!("session", %client_id, %workspace_id);
    session(ws, client_id, workspace_id, identity, ctx)
        .instrument(span)
        .await;
}

async fn session(
    ws: WebSocket,
    client_id: ClientId,
    workspace_id: WorkspaceId,
    identity: Identity,
    ctx: SessionContext,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel(ctx.settings.send_queue_capacity);
    let connection = Arc::new(ClientConnection::new(
        client_id.clone(),
        workspace_id.clone(),
        identity.id.clone(),
        send_tx,
    ));

    // Connecting → Joined
    let record = ConnectionRecord {
        client_id: client_id.clone(),
        workspace_id: workspace_id.clone(),
        user_id: identity.id,
        user_email: identity.email,
        connected_at: Utc::now(),
    };
    let ack = ConnectedAck {
        client_id: client_id.clone(),
        workspace_id: workspace_id.clone(),
        user_id: record.user_id.clone(),
        timestamp: record.connected_at,
    };
    let (ws_room, own_room) = admit(&ctx.rooms, &connection, &ack);
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let effects = spawn_effects(ctx.registry.clone(), client_id.clone(), workspace_id.clone());
    let _ = effects.send(Effect::Joined(record));

    let interval = Duration::from_secs(ctx.settings.heartbeat_interval_secs);
    let timeout = Duration::from_secs(ctx.settings.heartbeat_timeout_secs);
    let writer = tokio::spawn(write_loop(ws_tx, send_rx, connection.clone(), interval));
    let heartbeat = run_heartbeat(connection.clone(), interval, timeout);
    tokio::pin!(heartbeat);

    // Joined (self-loop on client frames)
    let reason = loop {
        tokio::select! {
            biased;
            () = ctx.shutdown.cancelled() => break DisconnectReason::ServerShutdown,
            () = connection.closed() => break DisconnectReason::SlowClient,
            () = &mut heartbeat => break DisconnectReason::HeartbeatTimeout,
            incoming = ws_rx.next() => {
                let msg = match incoming {
                    None => break DisconnectReason::ClientGone,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        break DisconnectReason::TransportError;
                    }
                    Some(Ok(msg)) => msg,
                };
                connection.mark_alive();
                let effect = match msg {
                    Message::Close(_) => break DisconnectReason::ClientClosed,
                    Message::Text(text) => client_effect(text.as_str()),
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => client_effect(text),
                        Err(_) => Effect::Unreadable(format!("{} bytes of non-UTF-8 binary", data.len())),
                    },
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                let _ = effects.send(effect);
            }
        }
    };

    // Joined → Disconnected
    let room_size = ctx.rooms.leave(&ws_room, &client_id);
    let _ = ctx.rooms.leave(&own_room, &client_id);
    connection.close();
    match writer.await {
        Ok(mut sink) => {
            if let Some(frame) = reason.close_frame() {
                let _ = sink.send(Message::Close(Some(frame))).await;
            }
            let _ = sink.close().await;
        }
        Err(e) => debug!(error = %e, "writer task failed"),
    }

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    let _ = effects.send(Effect::Left {
        reason,
        room_size,
        duration: connection.age(),
    });
}

/// Queue the `connected` ack, then join the workspace and user rooms.
/// Returns the two room names.
fn admit(rooms: &RoomTable, connection: &Arc<ClientConnection>, ack: &ConnectedAck) -> (String, String) {
    let queued = Frame::new(CONNECTED, ack)
        .and_then(|frame| serde_json::to_string(&frame))
        .map(|text| connection.send(text.into()));
    match queued {
        Ok(true) => {}
        Ok(false) => warn!("could not queue connected ack"),
        Err(e) => warn!(error = %e, "failed to serialize connected ack"),
    }

    let ws_room = workspace_room(&ack.workspace_id);
    let own_room = user_room(&ack.user_id);
    rooms.join(&ws_room, connection.clone());
    rooms.join(&own_room, connection.clone());
    (ws_room, own_room)
}

fn client_effect(text: &str) -> Effect {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => Effect::ClientEvent(frame),
        Err(e) => Effect::Unreadable(e.to_string()),
    }
}

/// Forward queued frames and send periodic pings until the connection is
/// closed or the socket fails. Hands the sink back for the close frame.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Arc<str>>,
    connection: Arc<ClientConnection>,
    ping_every: Duration,
) -> SplitSink<WebSocket, Message> {
    let mut ping = time::interval(ping_every);
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            () = connection.closed() => break,
            frame = frames.recv() => {
                let Some(text) = frame else { break };
                if sink.send(Message::Text(text.as_ref().into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    sink
}

fn spawn_effects(
    registry: Arc<ConnectionRegistry>,
    client_id: ClientId,
    workspace_id: WorkspaceId,
) -> mpsc::UnboundedSender<Effect> {
    let (tx, rx) = mpsc::unbounded_channel();
    let span = info_span!("session_effects", %client_id, %workspace_id);
    drop(tokio::spawn(
        apply_effects(rx, registry, client_id).instrument(span),
    ));
    tx
}

async fn apply_effects(
    mut rx: mpsc::UnboundedReceiver<Effect>,
    registry: Arc<ConnectionRegistry>,
    client_id: ClientId,
) {
    while let Some(effect) = rx.recv().await {
        match effect {
            Effect::Joined(record) => {
                let user_id = record.user_id.clone();
                registry.put(client_id.clone(), record);
                info!(%user_id, connections = registry.len(), "client joined");
            }
            Effect::ClientEvent(frame) => {
                info!(event = %frame.event, args = ?frame.args, "client event");
            }
            Effect::Unreadable(reason) => {
                debug!(reason = %reason, "ignoring unreadable client frame");
            }
            Effect::Left {
                reason,
                room_size,
                duration,
            } => {
                let _ = registry.remove(&client_id);
                info!(
                    reason = reason.as_str(),
                    room_size,
                    duration_secs = duration.as_secs(),
                    "client disconnected"
                );
            }
        }
    }
}
