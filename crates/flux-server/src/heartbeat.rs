//! Ping/pong liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::connection::ClientConnection;

/// Number of consecutive silent intervals tolerated, at least 1.
pub fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    u32::try_from(timeout.as_millis() / interval_ms).unwrap_or(u32::MAX).max(1)
}

/// Watch a connection's alive flag until it goes silent.
///
/// Every `interval` the flag is read and cleared. Any frame from the client
/// (including pongs to the writer's pings) sets it again. After
/// [`max_missed`] consecutive silent intervals the client is declared dead.
/// Resolves only then; callers stop it by dropping the future.
pub async fn run_heartbeat(connection: Arc<ClientConnection>, interval: Duration, timeout: Duration) {
    let limit = max_missed(interval, timeout);
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so a new client gets a full
    // interval.
    let _ = ticker.tick().await;

    let mut missed = 0;
    loop {
        let _ = ticker.tick().await;
        if connection.check_alive() {
            missed = 0;
        } else {
            missed += 1;
            if missed >= limit {
                return;
            }
        }
    }
}
