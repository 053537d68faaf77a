//! # flux-server
//!
//! Client-facing side of the Flux relay: an Axum server that accepts
//! websocket connections at `/events/{workspace_id}`, tracks them in a
//! [`ConnectionRegistry`], and fans events out through workspace and user
//! rooms via [`RoomEmitter`].

#![deny(unsafe_code)]

pub mod auth;
pub mod connection;
pub mod emitter;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod session;

pub use auth::Identity;
pub use emitter::RoomEmitter;
pub use error::ServerError;
pub use health::QueueStatus;
pub use registry::{ConnectionRecord, ConnectionRegistry};
pub use server::{FluxServer, ServerHandle};
