//! Facilities to publish messages to a RabbitMq exchange. Check out [`Publisher`] as a starting point.
mod message_envelope;
mod publisher;
mod retry;

pub use message_envelope::MessageEnvelope;
pub use publisher::{Publisher, PublisherBuilder, PublisherError};
pub use retry::{constant_delay, linear_delay, DelayStrategy, RetryPolicy};
