/// Error returned by [`Connector`](super::Connector).
#[derive(thiserror::Error, Debug)]
pub enum ConnectorError {
    #[error("Failed to connect to RabbitMq after {attempts} attempts")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("There is no live connection to RabbitMq")]
    NotConnected,
    #[error("Failed to open a channel on the RabbitMq connection")]
    Channel(#[source] anyhow::Error),
    #[error("The connector was shut down")]
    Cancelled,
}
