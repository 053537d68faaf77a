//! Keeps one live queue subscription, reconnecting with backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flux_queue::amqp::AmqpStream;
use flux_queue::{DeliveryStream, MessageHandler, QueueError, subscribe};
use flux_server::QueueStatus;
use flux_settings::{AmqpSettings, SupervisorSettings};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Opens delivery streams.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stream type produced by a successful connect.
    type Stream: DeliveryStream;

    /// Open one stream. Called again after every failure.
    async fn connect(&self) -> Result<Self::Stream, QueueError>;
}

/// Connects to the AMQP broker described by [`AmqpSettings`].
pub struct AmqpConnector {
    settings: AmqpSettings,
}

impl AmqpConnector {
    /// Create a connector for `settings`.
    pub fn new(settings: AmqpSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    type Stream = AmqpStream;

    async fn connect(&self) -> Result<AmqpStream, QueueError> {
        AmqpStream::connect(&self.settings).await
    }
}

/// Supervisor failures that end the process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// No connection could be established before the startup deadline.
    #[error("queue not reachable within {secs}s of startup")]
    InitialConnectTimeout {
        /// The configured deadline.
        secs: u64,
    },
}

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped
/// at `max`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Owns the subscription lifecycle for one handler.
pub struct QueueSupervisor<C: Connector> {
    connector: C,
    handler: Arc<dyn MessageHandler>,
    settings: SupervisorSettings,
    status: Arc<QueueStatus>,
}

impl<C: Connector> QueueSupervisor<C> {
    /// Create a supervisor. `status` mirrors connectivity for `/health`.
    pub fn new(
        connector: C,
        handler: Arc<dyn MessageHandler>,
        settings: SupervisorSettings,
        status: Arc<QueueStatus>,
    ) -> Self {
        Self {
            connector,
            handler,
            settings,
            status,
        }
    }

    /// Run until `token` is cancelled.
    ///
    /// Fails only when the first connection is not up within
    /// `initial_connect_timeout_secs`. Later failures are retried forever.
    pub async fn run(self, token: CancellationToken) -> Result<(), SupervisorError> {
        self.status.set_connected(false);

        let deadline = Duration::from_secs(self.settings.initial_connect_timeout_secs);
        let first = tokio::time::timeout(deadline, self.connect_with_backoff(&token))
            .await
            .map_err(|_| SupervisorError::InitialConnectTimeout {
                secs: self.settings.initial_connect_timeout_secs,
            })?;
        let Some(mut stream) = first else {
            return Ok(());
        };

        loop {
            let subscription = subscribe(stream, self.handler.clone(), &token);
            self.status.set_connected(true);
            info!("queue subscription active");

            let result = subscription.join().await;
            self.status.set_connected(false);
            match result {
                Ok(()) => {
                    info!("queue supervisor stopped");
                    return Ok(());
                }
                Err(e) => error!(error = %e, "queue subscription failed, reconnecting"),
            }

            let pause = Duration::from_millis(self.settings.reconnect_delay_ms);
            if !sleep_unless_cancelled(pause, &token).await {
                return Ok(());
            }
            stream = match self.connect_with_backoff(&token).await {
                Some(stream) => stream,
                None => return Ok(()),
            };
        }
    }

    /// Connect, retrying in rounds of one attempt plus `max_retries` retries
    /// separated by a cooldown. `None` once `token` is cancelled.
    async fn connect_with_backoff(&self, token: &CancellationToken) -> Option<C::Stream> {
        let attempts = self.settings.max_retries.saturating_add(1);
        let base = Duration::from_millis(self.settings.base_delay_ms);
        let max = Duration::from_millis(self.settings.max_delay_ms);

        loop {
            for attempt in 0..attempts {
                let result = tokio::select! {
                    biased;
                    () = token.cancelled() => return None,
                    result = self.connector.connect() => result,
                };
                match result {
                    Ok(stream) => {
                        info!(attempt = attempt + 1, "connected to queue");
                        return Some(stream);
                    }
                    Err(e) => warn!(attempt = attempt + 1, attempts, error = %e, "queue connect failed"),
                }
                if attempt + 1 < attempts
                    && !sleep_unless_cancelled(backoff_delay(attempt, base, max), token).await
                {
                    return None;
                }
            }

            error!(
                attempts,
                cooldown_secs = self.settings.cooldown_secs,
                "queue connect retries exhausted, cooling down"
            );
            let cooldown = Duration::from_secs(self.settings.cooldown_secs);
            if !sleep_unless_cancelled(cooldown, token).await {
                return None;
            }
        }
    }
}

/// `false` if `token` fired first.
async fn sleep_unless_cancelled(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
