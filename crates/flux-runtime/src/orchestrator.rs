//! Per-message routing: decode, resolve the workspace, emit, ack.

use std::sync::Arc;

use async_trait::async_trait;
use flux_core::{Emitter, WORK_ITEM_UPDATED, WorkItemUpdate, decode};
use flux_queue::{Message, MessageHandler};
use flux_telemetry::metrics::RELAY_MESSAGES_TOTAL;
use metrics::counter;
use tracing::{debug, info, warn};

/// What happened to one message. Every outcome is acked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The body did not decode as an envelope.
    Rejected,
    /// Valid envelope without a workspace; not meant for live clients.
    Skipped,
    /// Emitted to a workspace room.
    Routed {
        /// Target workspace.
        workspace_id: flux_core::WorkspaceId,
        /// Connections the event was handed to.
        recipients: usize,
    },
}

impl Outcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
            Self::Routed { .. } => "routed",
        }
    }
}

/// Routes queue messages to workspace rooms.
pub struct RelayOrchestrator {
    emitter: Arc<dyn Emitter>,
}

impl RelayOrchestrator {
    /// Create an orchestrator that emits through `emitter`.
    pub fn new(emitter: Arc<dyn Emitter>) -> Self {
        Self { emitter }
    }

    /// Handle one message and ack it. The single ack below is reached on
    /// every branch.
    pub async fn process(&self, message: &Message) -> Outcome {
        let outcome = self.route(message).await;
        message.ack().await;
        counter!(RELAY_MESSAGES_TOTAL, "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn route(&self, message: &Message) -> Outcome {
        let envelope = match decode(message.content()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping undecodable event");
                return Outcome::Rejected;
            }
        };

        let Some(workspace_id) = envelope.workspace() else {
            debug!(
                event_type = envelope.event_type.as_deref(),
                entity_id = envelope.entity_id.as_deref(),
                publisher = envelope.publisher.as_deref(),
                "event skipped, no workspace to route to"
            );
            return Outcome::Skipped;
        };

        let update = WorkItemUpdate::project(&envelope, workspace_id.clone());
        let payload = match serde_json::to_value(&update) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%workspace_id, error = %e, "failed to serialize work item update");
                return Outcome::Rejected;
            }
        };
        let recipients = self
            .emitter
            .emit_to_workspace(&workspace_id, WORK_ITEM_UPDATED, payload)
            .await;

        info!(
            %workspace_id,
            entity_id = envelope.entity_id.as_deref(),
            event_type = envelope.event_type.as_deref(),
            publisher = envelope.publisher.as_deref(),
            source = envelope.source.as_deref(),
            recipients,
            "event routed"
        );
        Outcome::Routed {
            workspace_id,
            recipients,
        }
    }
}

#[async_trait]
impl MessageHandler for RelayOrchestrator {
    async fn handle(&self, message: &Message) {
        let _ = self.process(message).await;
    }
}
