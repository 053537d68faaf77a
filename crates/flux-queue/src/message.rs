//! A delivered message and its acknowledgement handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use flux_telemetry::metrics::{RELAY_ACK_FAILURES_TOTAL, RELAY_ACKS_TOTAL};
use serde_json::Value;
use tracing::warn;

use crate::error::QueueError;

/// Transport-specific acknowledgement.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Tell the broker the delivery is done.
    async fn ack(&self) -> Result<(), QueueError>;
}

/// One delivery pulled from the queue.
pub struct Message {
    content: Value,
    acker: Arc<dyn Acker>,
    acked: AtomicBool,
}

impl Message {
    /// Wrap decoded content with the transport's acker.
    pub fn new(content: Value, acker: Arc<dyn Acker>) -> Self {
        Self {
            content,
            acker,
            acked: AtomicBool::new(false),
        }
    }

    /// Raw message content. Non-JSON bodies arrive as a JSON string.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Acknowledge the delivery.
    ///
    /// Idempotent: only the first call reaches the broker. Broker failures
    /// are logged and counted, never returned; the delivery will be
    /// redelivered by the broker if the ack was really lost.
    pub async fn ack(&self) {
        if self.acked.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.acker.ack().await {
            Ok(()) => metrics::counter!(RELAY_ACKS_TOTAL).increment(1),
            Err(e) => {
                metrics::counter!(RELAY_ACK_FAILURES_TOTAL).increment(1);
                warn!(error = %e, "failed to acknowledge message");
            }
        }
    }

    /// Whether [`ack`](Self::ack) has been called.
    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("content", &self.content)
            .field("acked", &self.is_acked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingAcker {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Acker for CountingAcker {
        async fn ack(&self) -> Result<(), QueueError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(QueueError::Ack("channel closed".into()))
            } else {
                Ok(())
            }
        }
    }

    fn acker(fail: bool) -> Arc<CountingAcker> {
        Arc::new(CountingAcker {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn ack_is_idempotent() {
        let acker = acker(false);
        let msg = Message::new(serde_json::json!({}), acker.clone());
        assert!(!msg.is_acked());
        msg.ack().await;
        msg.ack().await;
        msg.ack().await;
        assert!(msg.is_acked());
        assert_eq!(acker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ack_failure_is_swallowed() {
        let acker = acker(true);
        let msg = Message::new(Value::Null, acker.clone());
        msg.ack().await;
        assert!(msg.is_acked());
        msg.ack().await;
        assert_eq!(acker.calls.load(Ordering::SeqCst), 1);
    }
}
