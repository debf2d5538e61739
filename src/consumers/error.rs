/// Error returned by [`Consumer::declare`](super::Consumer::declare) and
/// [`Consumer::consume`](super::Consumer::consume).
///
/// Each of them means the consume loop is dead: it has to be started again on a fresh channel.
#[derive(thiserror::Error, Debug)]
pub enum ConsumerError {
    #[error("Failed to declare the `{exchange}` exchange")]
    DeclareExchange {
        exchange: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to declare the `{queue}` queue")]
    DeclareQueue {
        queue: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to bind the `{queue}` queue to the `{exchange}` exchange with routing key `{routing_key}`")]
    BindQueue {
        queue: String,
        exchange: String,
        routing_key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to set the prefetch count of the channel")]
    Qos(#[source] anyhow::Error),
    #[error("Failed to start consuming from the `{queue}` queue")]
    Consume {
        queue: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("The delivery stream was closed by the broker")]
    DeliveryStreamClosed,
    #[error("Failed to receive a delivery")]
    Delivery(#[source] anyhow::Error),
    #[error("The consume loop was cancelled")]
    Cancelled,
}

/// Why processing a message failed. Never surfaced by the consume loop: only logged.
#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("The job failed to process the message")]
    Failed(#[source] anyhow::Error),
    #[error("The job panicked while processing the message: {reason}")]
    Panicked {
        reason: String,
        /// `file:line:column` of the panic, if it could be captured.
        location: Option<String>,
        stack_trace: Option<String>,
    },
    /// The task running the job was cancelled, e.g. because the runtime is shutting down.
    #[error("The job was aborted before completing")]
    Aborted,
}
