//! Queue error types.

/// Boxed transport error, so the in-memory and AMQP transports share one type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the queue connection. All of them are fatal to the
/// subscription that hit them; recovery belongs to the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Could not establish the broker connection or declare the topology.
    #[error("failed to connect to queue: {0}")]
    Connect(#[source] BoxError),
    /// The delivery stream reported an error.
    #[error("queue consume failed: {0}")]
    Consume(#[source] BoxError),
    /// The broker rejected an acknowledgement.
    #[error("queue ack failed: {0}")]
    Ack(#[source] BoxError),
    /// The delivery stream ended without an error.
    #[error("queue stream closed")]
    Closed,
}
