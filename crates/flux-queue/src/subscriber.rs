//! Sequential consume loop with scoped release.
//!
//! [`subscribe`] spawns one task per subscription. The task pulls a message,
//! runs the handler to completion, makes sure the message was acked, and only
//! then pulls the next one. Whatever ends the loop (cancellation, drop of the
//! [`Subscription`], stream end, stream error, a panic) the stream's
//! [`release`](DeliveryStream::release) runs before the task exits.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::error::QueueError;
use crate::message::Message;

/// A source of deliveries.
#[async_trait]
pub trait DeliveryStream: Send + 'static {
    /// Next delivery. `None` means the stream ended.
    async fn next_message(&mut self) -> Option<Result<Message, QueueError>>;

    /// Stop consuming and close the underlying transport. Must tolerate
    /// being called after the transport already failed.
    async fn release(&mut self);
}

/// Per-message callback.
///
/// Implementations must call [`Message::ack`] exactly once on every path.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    async fn handle(&self, message: &Message);
}

/// Handle to a running subscription.
///
/// Dropping the handle cancels the subscription; the consume task then
/// releases the stream on its own.
pub struct Subscription {
    token: CancellationToken,
    task: JoinHandle<Result<(), QueueError>>,
    _guard: DropGuard,
}

impl Subscription {
    /// Token that stops this subscription when cancelled.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the consume task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the subscription to end.
    ///
    /// `Ok(())` means it was cancelled; any other ending is an error.
    pub async fn join(self) -> Result<(), QueueError> {
        let Self { task, _guard, .. } = self;
        match task.await {
            Ok(result) => result,
            Err(e) => Err(QueueError::Consume(Box::new(e))),
        }
    }

    /// Cancel the subscription and wait for the stream to be released.
    pub async fn shutdown(self) -> Result<(), QueueError> {
        self.token.cancel();
        self.join().await
    }
}

/// Start consuming `stream` with `handler`.
///
/// The subscription is cancelled when `parent` is cancelled.
pub fn subscribe<S>(
    mut stream: S,
    handler: Arc<dyn MessageHandler>,
    parent: &CancellationToken,
) -> Subscription
where
    S: DeliveryStream,
{
    let token = parent.child_token();
    let loop_token = token.clone();

    let task = tokio::spawn(async move {
        let result = AssertUnwindSafe(consume(&mut stream, handler.as_ref(), &loop_token))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(QueueError::Consume(
                    format!("consume loop panicked: {}", panic_reason(panic.as_ref())).into(),
                ))
            });
        match &result {
            Ok(()) => info!("subscription cancelled, releasing queue stream"),
            Err(e) => warn!(error = %e, "subscription ended, releasing queue stream"),
        }
        stream.release().await;
        result
    });

    Subscription {
        _guard: token.clone().drop_guard(),
        token,
        task,
    }
}

async fn consume<S: DeliveryStream>(
    stream: &mut S,
    handler: &dyn MessageHandler,
    token: &CancellationToken,
) -> Result<(), QueueError> {
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => return Ok(()),
            next = stream.next_message() => next,
        };
        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(e),
            None => return Err(QueueError::Closed),
        };

        if let Err(panic) = AssertUnwindSafe(handler.handle(&message)).catch_unwind().await {
            error!(reason = %panic_reason(panic.as_ref()), "message handler panicked");
        }
        if !message.is_acked() {
            warn!("handler returned without acking, acking on its behalf");
            message.ack().await;
        }
        debug!("message handled");
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory;
    use assert_matches::assert_matches;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Records content; acks unless told not to.
    struct Recorder {
        seen: Mutex<Vec<Value>>,
        ack: bool,
        delay: Option<Duration>,
    }

    impl Recorder {
        fn new(ack: bool) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                ack,
                delay: None,
            })
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: &Message) {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.seen.lock().await.push(message.content().clone());
            if self.ack {
                message.ack().await;
            }
        }
    }

    #[tokio::test]
    async fn handles_messages_in_order_and_acks_each_once() {
        let (publisher, stream) = memory::channel();
        let handler = Recorder::new(true);
        let root = CancellationToken::new();
        let sub = subscribe(stream, handler.clone(), &root);

        let probes: Vec<_> = (0..5).map(|i| publisher.publish_json(&json!({"n": i}))).collect();
        for probe in &probes {
            probe.wait_acked().await;
        }

        let seen = handler.seen.lock().await.clone();
        assert_eq!(seen, (0..5).map(|i| json!({"n": i})).collect::<Vec<_>>());
        assert!(probes.iter().all(|p| p.count() == 1));

        sub.shutdown().await.unwrap();
        assert!(publisher.is_released());
    }

    #[tokio::test]
    async fn subscriber_acks_when_handler_forgets() {
        let (publisher, stream) = memory::channel();
        let handler = Recorder::new(false);
        let _sub = subscribe(stream, handler.clone(), &CancellationToken::new());

        let probe = publisher.publish_json(&json!({"workspace_id": "W1"}));
        probe.wait_acked().await;
        assert_eq!(probe.count(), 1);
    }

    #[tokio::test]
    async fn non_json_body_reaches_handler_as_string() {
        let (publisher, stream) = memory::channel();
        let handler = Recorder::new(true);
        let _sub = subscribe(stream, handler.clone(), &CancellationToken::new());

        publisher.publish(b"not-json-shaped".to_vec()).wait_acked().await;
        assert_eq!(handler.seen.lock().await[0], json!("not-json-shaped"));
    }

    #[tokio::test]
    async fn stream_error_is_surfaced_and_stream_released() {
        let (publisher, stream) = memory::channel();
        let sub = subscribe(stream, Recorder::new(true), &CancellationToken::new());

        publisher.fail("connection reset");
        let err = sub.join().await.unwrap_err();
        assert_matches!(err, QueueError::Consume(_));
        assert!(publisher.is_released());
    }

    #[tokio::test]
    async fn stream_end_is_reported_as_closed() {
        let (publisher, stream) = memory::channel();
        let released = publisher.release_watch();
        let sub = subscribe(stream, Recorder::new(true), &CancellationToken::new());

        drop(publisher);
        assert_matches!(sub.join().await, Err(QueueError::Closed));
        assert!(released.is_released());
    }

    #[tokio::test]
    async fn parent_cancellation_releases_stream() {
        let (publisher, stream) = memory::channel();
        let root = CancellationToken::new();
        let sub = subscribe(stream, Recorder::new(true), &root);

        root.cancel();
        sub.join().await.unwrap();
        assert!(publisher.is_released());
    }

    #[tokio::test]
    async fn dropping_handle_releases_stream() {
        let (publisher, stream) = memory::channel();
        let sub = subscribe(stream, Recorder::new(true), &CancellationToken::new());

        drop(sub);
        tokio::time::timeout(Duration::from_secs(5), publisher.wait_released())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn next_message_waits_for_previous_handler() {
        let (publisher, stream) = memory::channel();
        let handler = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            ack: true,
            delay: Some(Duration::from_secs(10)),
        });
        let _sub = subscribe(stream, handler.clone(), &CancellationToken::new());

        let first = publisher.publish_json(&json!(1));
        let second = publisher.publish_json(&json!(2));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 0);

        second.wait_acked().await;
        assert_eq!(handler.seen.lock().await.len(), 2);
    }

    /// Panics on bodies equal to `"boom"`, acks everything else.
    struct Fragile;

    #[async_trait]
    impl MessageHandler for Fragile {
        async fn handle(&self, message: &Message) {
            assert_ne!(message.content(), &json!("boom"), "handler bug");
            message.ack().await;
        }
    }

    #[tokio::test]
    async fn handler_panic_acks_and_keeps_consuming() {
        let (publisher, stream) = memory::channel();
        let sub = subscribe(stream, Arc::new(Fragile), &CancellationToken::new());

        let bad = publisher.publish_json(&json!("boom"));
        let good = publisher.publish_json(&json!({"workspace_id": "W1"}));
        bad.wait_acked().await;
        good.wait_acked().await;
        assert_eq!(bad.count(), 1);
        assert!(!sub.is_finished());

        sub.shutdown().await.unwrap();
        assert!(publisher.is_released());
    }

    /// Stream whose transport blows up while pulling a delivery.
    struct PanickingStream {
        released: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl DeliveryStream for PanickingStream {
        async fn next_message(&mut self) -> Option<Result<Message, QueueError>> {
            panic!("transport bug");
        }

        async fn release(&mut self) {
            self.released.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn panic_inside_consume_loop_still_releases() {
        let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stream = PanickingStream {
            released: released.clone(),
        };
        let sub = subscribe(stream, Recorder::new(true), &CancellationToken::new());

        let err = sub.join().await.unwrap_err();
        assert_matches!(err, QueueError::Consume(_));
        assert!(err.to_string().contains("transport bug"), "got: {err}");
        assert!(released.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn panic_reason_reads_both_payload_kinds() {
        let static_str: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_reason(static_str.as_ref()), "static");
        assert_eq!(panic_reason(owned.as_ref()), "owned");
        assert_eq!(panic_reason(other.as_ref()), "non-string panic payload");
    }
}
