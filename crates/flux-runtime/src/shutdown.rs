//! Process-wide shutdown: one root token, signal handling, bounded drain.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns the root cancellation token every long-lived task hangs off.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator with a fresh root token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the root token. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has started.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the root token on the first SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                signal = wait_for_signal() => {
                    info!(signal, "shutdown signal received");
                    token.cancel();
                }
            }
        })
    }

    /// Trigger shutdown and wait up to `timeout` for `handles`.
    ///
    /// Returns `false` if the deadline passed; unfinished tasks are aborted.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.trigger();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "draining tasks"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_ok()
        {
            return true;
        }
        warn!(?timeout, "shutdown drain timed out, aborting remaining tasks");
        for abort in aborts {
            abort.abort();
        }
        false
    }
}

/// Resolves with the name of the first termination signal received.
pub async fn wait_for_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler, listening for SIGINT only");
                ctrl_c().await
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for SIGINT");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_untriggered() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_triggered());
        assert!(!coord.token().is_cancelled());
    }

    #[test]
    fn trigger_cancels_every_clone() {
        let coord = ShutdownCoordinator::new();
        let tokens = [coord.token(), coord.token(), coord.clone().token()];
        coord.trigger();
        coord.trigger();
        assert!(coord.is_triggered());
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }

    #[test]
    fn child_tokens_follow_root() {
        let coord = ShutdownCoordinator::new();
        let child = coord.token().child_token();
        child.cancel();
        assert!(!coord.is_triggered());
        let other = coord.token().child_token();
        coord.trigger();
        assert!(other.is_cancelled());
    }

    #[tokio::test]
    async fn drain_waits_for_cooperative_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move { token.cancelled().await });

        assert!(coord.drain(vec![handle], Duration::from_secs(5)).await);
        assert!(coord.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_stuck_tasks_after_timeout() {
        let coord = ShutdownCoordinator::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _tx = tx;
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        let started = tokio::time::Instant::now();

        assert!(!coord.drain(vec![handle], Duration::from_millis(100)).await);
        // Aborting drops the task's sender long before its sleep would end.
        assert!(rx.await.is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn signal_listener_exits_on_trigger() {
        let coord = ShutdownCoordinator::new();
        let listener = coord.listen_for_signals();
        coord.trigger();
        listener.await.unwrap();
    }
}
