//! Live state of one websocket client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use flux_core::{ClientId, UserId, WorkspaceId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A connected websocket client as seen by rooms and the emitter.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ClientId,
    /// Namespace the client connected to.
    pub workspace_id: WorkspaceId,
    /// Authenticated user.
    pub user_id: UserId,
    /// When this connection was established.
    pub connected_at: Instant,
    tx: mpsc::Sender<Arc<str>>,
    is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    dropped_frames: AtomicU64,
    closed: CancellationToken,
}

impl ClientConnection {
    /// Create a connection whose outbound frames go to `tx`.
    pub fn new(
        id: ClientId,
        workspace_id: WorkspaceId,
        user_id: UserId,
        tx: mpsc::Sender<Arc<str>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            workspace_id,
            user_id,
            connected_at: now,
            tx,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_frames: AtomicU64::new(0),
            closed: CancellationToken::new(),
        }
    }

    /// Queue a serialized frame for the client.
    ///
    /// Never waits. Returns `false` if the queue is full or the writer is
    /// gone, and counts the drop.
    pub fn send(&self, frame: Arc<str>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Frames dropped so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Record client activity (pong, ping or any frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Read and clear the alive flag. `true` if the client was heard from
    /// since the previous check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the client was last heard from.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Ask the session to disconnect this client.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is asked to close.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("workspace_id", &self.workspace_id)
            .field("user_id", &self.user_id)
            .field("dropped_frames", &self.drop_count())
            .finish_non_exhaustive()
    }
}
