//! # flux-queue
//!
//! Queue consumption for the Flux relay.
//!
//! A [`DeliveryStream`] yields [`Message`]s; [`subscribe`] drives them one at
//! a time through a [`MessageHandler`] and guarantees that every message is
//! acknowledged exactly once and that the stream is released however the
//! subscription ends. [`amqp::AmqpStream`] is the production transport;
//! [`memory::channel`] is an in-process one.

#![deny(unsafe_code)]

pub mod amqp;
pub mod error;
pub mod memory;
pub mod message;
pub mod subscriber;

pub use error::{BoxError, QueueError};
pub use message::{Acker, Message};
pub use subscriber::{DeliveryStream, MessageHandler, Subscription, subscribe};
