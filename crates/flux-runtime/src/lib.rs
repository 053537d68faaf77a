//! # flux-runtime
//!
//! The relay's moving parts above the transport: the per-message
//! [`RelayOrchestrator`], the reconnecting [`QueueSupervisor`], and the
//! process [`ShutdownCoordinator`].

#![deny(unsafe_code)]

pub mod orchestrator;
pub mod shutdown;
pub mod supervisor;

pub use orchestrator::{Outcome, RelayOrchestrator};
pub use shutdown::{ShutdownCoordinator, wait_for_signal};
pub use supervisor::{AmqpConnector, Connector, QueueSupervisor, SupervisorError, backoff_delay};
