//! `FluxServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::{Extension, Router, middleware};
use flux_core::{ClientId, WorkspaceId};
use flux_settings::{AuthSettings, ServerSettings};
use flux_telemetry::metrics::{WS_REJECTED_TOTAL, render};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{Identity, proxy_identity};
use crate::emitter::RoomEmitter;
use crate::error::ServerError;
use crate::health::{HealthResponse, QueueStatus, health_check};
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomTable;
use crate::session::{SessionContext, reject_unauthenticated, run_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Everything a websocket session needs.
    pub session: SessionContext,
    /// Queue connectivity, for `/health`.
    pub queue_status: Arc<QueueStatus>,
    /// Prometheus handle, for `/metrics`.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
    active: Arc<AtomicUsize>,
}

/// Counts one live socket against `max_connections` until dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let prev = active.fetch_add(1, Ordering::AcqRel);
        if prev >= max {
            let _ = active.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(Self(active.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The relay's client-facing server.
pub struct FluxServer {
    settings: Arc<ServerSettings>,
    auth: Arc<AuthSettings>,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomTable>,
    queue_status: Arc<QueueStatus>,
    metrics: Option<PrometheusHandle>,
    shutdown: CancellationToken,
    start_time: Instant,
    active: Arc<AtomicUsize>,
}

impl FluxServer {
    /// Create a server. Sessions end and the listener drains when
    /// `shutdown` is cancelled.
    pub fn new(
        settings: ServerSettings,
        auth: AuthSettings,
        shutdown: CancellationToken,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            auth: Arc::new(auth),
            registry: Arc::new(ConnectionRegistry::new()),
            rooms: Arc::new(RoomTable::new()),
            queue_status: Arc::new(QueueStatus::new()),
            metrics,
            shutdown,
            start_time: Instant::now(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            session: SessionContext {
                registry: self.registry.clone(),
                rooms: self.rooms.clone(),
                settings: self.settings.clone(),
                shutdown: self.shutdown.clone(),
            },
            queue_status: self.queue_status.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            active: self.active.clone(),
        };

        let mut events = Router::new().route("/events/{workspace_id}", get(events_handler));
        if self.auth.trust_proxy_headers {
            events = events.route_layer(middleware::from_fn_with_state(
                self.auth.clone(),
                proxy_identity,
            ));
        }

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .merge(events)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Emitter that fans out to this server's rooms.
    pub fn emitter(&self) -> RoomEmitter {
        RoomEmitter::new(self.rooms.clone(), self.settings.max_dropped_frames)
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Room table.
    pub fn rooms(&self) -> &Arc<RoomTable> {
        &self.rooms
    }

    /// Queue connectivity reported on `/health`.
    pub fn queue_status(&self) -> &Arc<QueueStatus> {
        &self.queue_status
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn start(&self) -> Result<ServerHandle, ServerError> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

        let router = self.router();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .map_err(|source| ServerError::Serve {
                    addr: local_addr,
                    source,
                })?;
            info!(%local_addr, "server stopped");
            Ok(())
        });

        info!(%local_addr, "flux server listening");
        Ok(ServerHandle {
            addr: local_addr,
            task,
        })
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to stop.
    pub async fn join(self) -> Result<(), ServerError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ServerError::Serve {
                addr: self.addr,
                source: std::io::Error::other(e),
            }),
        }
    }
}

/// GET /events/{workspace_id}: websocket upgrade.
async fn events_handler(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    identity: Option<Extension<Identity>>,
    ws: WebSocketUpgrade,
) -> Response {
    let max = state.session.settings.max_connections;
    let Some(slot) = ConnectionSlot::acquire(&state.active, max) else {
        counter!(WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!(%workspace_id, max, "connection limit reached, refusing upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let workspace_id = WorkspaceId::from_raw(workspace_id);
    let ctx = state.session.clone();
    ws.max_message_size(ctx.settings.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            match identity {
                Some(Extension(identity)) => {
                    run_session(socket, ClientId::new(), workspace_id, identity, ctx).await;
                }
                None => {
                    counter!(WS_REJECTED_TOTAL, "reason" => "unauthenticated").increment(1);
                    reject_unauthenticated(socket, &workspace_id).await;
                }
            }
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_check(
        state.start_time,
        state.session.registry.len(),
        state.session.rooms.room_count(),
        state.queue_status.is_connected(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
