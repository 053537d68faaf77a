//! In-process delivery stream for tests and local runs.
//!
//! [`channel`] returns a publisher and a [`DeliveryStream`]. Every publish
//! hands back an [`AckProbe`] that counts how often the broker side saw an
//! ack for that message.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use flux_core::parse_content;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};

use crate::error::QueueError;
use crate::message::{Acker, Message};
use crate::subscriber::DeliveryStream;

enum Item {
    Body(Vec<u8>, AckProbe),
    Fail(String),
}

#[derive(Default)]
struct Flag {
    set: AtomicBool,
    notify: Notify,
}

impl Flag {
    fn raise(&self) {
        self.set.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.set.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// Create a connected publisher/stream pair.
pub fn channel() -> (MemoryPublisher, MemoryStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let released = Arc::new(Flag::default());
    (
        MemoryPublisher {
            tx,
            released: released.clone(),
        },
        MemoryStream { rx, released },
    )
}

/// Producer side of an in-memory queue.
pub struct MemoryPublisher {
    tx: mpsc::UnboundedSender<Item>,
    released: Arc<Flag>,
}

impl MemoryPublisher {
    /// Enqueue a raw body.
    pub fn publish(&self, body: impl Into<Vec<u8>>) -> AckProbe {
        let probe = AckProbe::default();
        let _ = self.tx.send(Item::Body(body.into(), probe.clone()));
        probe
    }

    /// Enqueue a JSON body.
    pub fn publish_json(&self, value: &Value) -> AckProbe {
        self.publish(value.to_string())
    }

    /// Make the stream yield a transport error.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.tx.send(Item::Fail(reason.into()));
    }

    /// Whether the consumer side released the stream.
    pub fn is_released(&self) -> bool {
        self.released.set.load(Ordering::Acquire)
    }

    /// Wait until the consumer side releases the stream.
    pub async fn wait_released(&self) {
        self.released.wait().await;
    }

    /// A handle that observes release after the publisher is gone.
    pub fn release_watch(&self) -> ReleaseWatch {
        ReleaseWatch(self.released.clone())
    }
}

/// Observes whether a [`MemoryStream`] was released.
#[derive(Clone)]
pub struct ReleaseWatch(Arc<Flag>);

impl ReleaseWatch {
    /// Whether the stream was released.
    pub fn is_released(&self) -> bool {
        self.0.set.load(Ordering::Acquire)
    }
}

/// Broker-side view of one published message.
#[derive(Clone, Default)]
pub struct AckProbe(Arc<ProbeState>);

#[derive(Default)]
struct ProbeState {
    count: AtomicUsize,
    notify: Notify,
}

impl AckProbe {
    /// Acks received so far.
    pub fn count(&self) -> usize {
        self.0.count.load(Ordering::Acquire)
    }

    /// Wait for the first ack.
    pub async fn wait_acked(&self) {
        loop {
            let notified = self.0.notify.notified();
            if self.count() > 0 {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Acker for AckProbe {
    async fn ack(&self) -> Result<(), QueueError> {
        let _ = self.0.count.fetch_add(1, Ordering::AcqRel);
        self.0.notify.notify_waiters();
        Ok(())
    }
}

/// Consumer side of an in-memory queue.
pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Item>,
    released: Arc<Flag>,
}

#[async_trait]
impl DeliveryStream for MemoryStream {
    async fn next_message(&mut self) -> Option<Result<Message, QueueError>> {
        match self.rx.recv().await? {
            Item::Body(body, probe) => Some(Ok(Message::new(parse_content(&body), Arc::new(probe)))),
            Item::Fail(reason) => Some(Err(QueueError::Consume(reason.into()))),
        }
    }

    async fn release(&mut self) {
        self.rx.close();
        self.released.raise();
    }
}
