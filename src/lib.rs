//! `rabbit-resilience` is a resilient client layer for RabbitMq, built on top of [`lapin`].
//!
//! A single [`Connector`](crate::connector::Connector) owns the connection to the broker and
//! dials it again whenever it is lost.
//! On top of it:
//! - [`Publisher`](crate::publishers::Publisher) publishes over pooled channels, retrying failed attempts;
//! - [`Consumer`](crate::consumers::Consumer) declares a queue and processes its messages one at a
//!   time, acking each of them exactly once even if processing fails or panics.
//!
//! [`PubSub::start`] wires everything together and is the best starting point.
//!
//! ## Examples
//!
//! Check the `demos` directory to see the library in action.

pub mod consumers;
pub mod publishers;

pub mod amqp;
pub mod connector;
pub mod pool;
mod pubsub;

pub use pubsub::PubSub;
