use rabbit_resilience::amqp::{configuration::RabbitMqSettings, ConnectionFactory};
use rabbit_resilience::connector::ConnectorConfig;
use rabbit_resilience::publishers::MessageEnvelope;
use rabbit_resilience::PubSub;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // First of all we build the configuration for our connection factory.
    // We are using the out-of-the-box parameters for the default RabbitMq Docker image.
    let settings = RabbitMqSettings::default();
    let connection_factory = ConnectionFactory::new_from_config(&settings)?;

    // `PubSub::start` dials RabbitMq in the background and keeps the connection alive:
    // when it drops, it is dialed again, up to `reconnect_attempts` times in a row.
    // The returned handle only resolves if we ask the connector to shut down (never, here)
    // or if RabbitMq stays unreachable for too long. The latter is fatal.
    let config = ConnectorConfig::default()
        .with_reconnect_attempts(5)
        .with_reconnect_wait(Duration::from_secs(1));
    let (pubsub, dial) = PubSub::start(connection_factory, config, std::future::pending())?;

    // Publishing fails straight away while disconnected, so we wait for the first connection.
    tokio::select! {
        connected = pubsub.connector().wait_until_connected(std::future::pending()) => connected?,
        dialed = dial => {
            dialed??;
            return Ok(());
        }
    }

    // Every publish leases a channel from the pool and is retried (10 attempts, 10ms × attempt
    // between them) if the broker does not confirm it.
    // A message id, a timestamp and the persistent delivery mode are added when missing.
    let message = MessageEnvelope::new("hello-exchange", "hello", "Hello world!").with_priority(5);

    // Publisher confirms are enabled and the message is mandatory, but nobody is listening on
    // `hello-exchange`: publishing should fail.
    assert!(pubsub.publisher().publish(message).await.is_err());

    Ok(())
}
