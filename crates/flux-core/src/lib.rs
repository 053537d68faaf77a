//! # flux-core
//!
//! Shared vocabulary of the Flux relay:
//!
//! - **Envelope**: [`envelope::EventEnvelope`] and the pure [`envelope::decode`]
//! - **Outbound**: client-facing projections and websocket frames
//! - **Branded IDs**: `ClientId`, `WorkspaceId`, `UserId`
//! - **Fan-out**: the [`emit::Emitter`] seam implemented by the transport

#![deny(unsafe_code)]

pub mod emit;
pub mod envelope;
pub mod ids;
pub mod outbound;

pub use emit::Emitter;
pub use envelope::{EventEnvelope, EventPayload, ParseError, decode, parse_content};
pub use ids::{ClientId, UserId, WorkspaceId};
pub use outbound::{CONNECTED, ClientFrame, ConnectedAck, Frame, WORK_ITEM_UPDATED, WorkItemUpdate};
