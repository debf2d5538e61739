//! Facilities to consume messages from a RabbitMq queue. Check out [`Consumer`] and
//! [`ConsumerGroup`] as a starting point.
pub use consumer::{Consumer, ConsumerState};
pub use error::{ConsumerError, JobError};
pub use group::{ConsumerGroup, ConsumerGroupBuilder};
pub use job::Job;
pub use processing::{process_delivery, ProcessingOutcome};
pub use queue_configuration::{
    QueueConfiguration, QueueConfigurationBuilder, QueueConfigurationError,
};

mod consumer;
mod error;
mod group;
mod job;
mod processing;
mod queue_configuration;
