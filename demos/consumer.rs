use rabbit_resilience::amqp::{configuration::RabbitMqSettings, ConnectionFactory};
use rabbit_resilience::connector::ConnectorConfig;
use rabbit_resilience::consumers::{Consumer, Job, QueueConfiguration};
use rabbit_resilience::PubSub;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // We are using the out-of-the-box parameters for the default RabbitMq Docker image.
    let settings = RabbitMqSettings::default();
    let connection_factory = ConnectionFactory::new_from_config(&settings)?;
    let (pubsub, _dial) = PubSub::start(
        connection_factory,
        ConnectorConfig::default(),
        std::future::pending(),
    )?;

    // Each consumer declares a topic exchange, declares its queue and binds it using the
    // routing key from its `QueueConfiguration`.
    // The odd queue is a priority queue: messages published with a higher priority jump ahead.
    let odd = QueueConfiguration::builder()
        .routing_key("odd")
        .max_priority(10)
        .build()?;
    let even = QueueConfiguration::builder()
        .routing_key("even")
        .durable(false)
        .auto_delete(true)
        .build()?;

    // Messages are processed one at a time per consume loop and always acked:
    // a job returning an error (or panicking!) gets the message dropped, not requeued.
    let odd = Consumer::new("test-exchange", "odd-messages-queue", Parity { odd: true }, odd);
    let even = Consumer::new("test-exchange", "even-messages-queue", Parity { odd: false }, even);

    // A consumer group restarts consume loops on a fresh channel whenever they die, e.g. because
    // the connection was lost.
    // We run two concurrent loops for the odd queue and one for the even queue.
    //
    // `run_until_sigterm` returns once the application receives SIGTERM.
    pubsub
        .consumer_group()
        .consumer(Arc::new(odd), 2)
        .consumer(Arc::new(even), 1)
        .build()
        .run_until_sigterm()
        .await?;

    Ok(())
}

/// A dummy job - processing succeeds if the payload has an odd (or even) number of bytes,
/// it fails otherwise.
struct Parity {
    odd: bool,
}

#[async_trait::async_trait]
impl Job for Parity {
    async fn process(&self, payload: &[u8]) -> Result<(), anyhow::Error> {
        let n_bytes = payload.len();
        if (n_bytes % 2 == 1) == self.odd {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "Unexpected parity: got {} bytes, expected an {} number",
                n_bytes,
                if self.odd { "odd" } else { "even" }
            ))
        }
    }
}
