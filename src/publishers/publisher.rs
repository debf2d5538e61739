use crate::amqp::options::BasicPublishOptions;
use crate::amqp::{BasicProperties, BrokerChannel, Confirmation};
use crate::pool::{ChannelManager, ChannelPool, PooledChannel};
use crate::publishers::retry::RetryPolicy;
use crate::publishers::MessageEnvelope;
use deadpool::managed::Object;
use lapin::message::BasicReturnMessage;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(3);
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// A high-level interface to publish messages.
///
/// # Fault tolerance
///
/// Every publish is attempted up to [`RetryPolicy::max_attempts`] times:
/// - each attempt leases an open channel from the pool first, failing straight away if
///   the connection is currently down;
/// - failed attempts are separated by the policy's delay.
///
/// Retried publishes are not deduplicated: the broker may receive the same message more than once.
///
/// # How do I build a `Publisher`?
///
/// The starting point is [`Publisher::builder`].
pub struct Publisher {
    /// Publisher confirms are awaited if the pool's [`ChannelManager`] enables them.
    channel_pool: ChannelPool,
    /// Timeout of a single publishing attempt, channel acquisition included.
    timeout: Duration,
    retry: RetryPolicy,
}

impl Publisher {
    /// Start building a [`Publisher`].
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use rabbit_resilience::amqp::ConnectionFactory;
    /// use rabbit_resilience::connector::{Connector, ConnectorConfig};
    /// use rabbit_resilience::pool::{ChannelManager, ChannelPool};
    /// use rabbit_resilience::publishers::{linear_delay, Publisher, RetryPolicy};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// fn get_publisher(connector: Arc<Connector>) -> Publisher {
    ///     let channel_pool = ChannelPool::builder(ChannelManager::new(connector))
    ///         .max_size(10)
    ///         .build()
    ///         .unwrap();
    ///
    ///     Publisher::builder(channel_pool)
    ///         .publish_timeout(Duration::from_secs(3))
    ///         .retry_policy(RetryPolicy::new(10, linear_delay(Duration::from_millis(10))))
    ///         .build()
    /// }
    /// ```
    pub fn builder(channel_pool: ChannelPool) -> PublisherBuilder {
        PublisherBuilder::new(channel_pool)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Publish a message to RabbitMq.
    ///
    /// Mandatory mode is enabled if the pooled channels have publisher confirmations on.
    /// Use `publish_with_options` to overwrite this behaviour.
    pub async fn publish(&self, envelope: MessageEnvelope) -> Result<(), PublisherError> {
        let options = BasicPublishOptions {
            mandatory: self.channel_pool.manager().publisher_confirms,
            // The immediate flag was dropped in RabbitMQ 3.0 - see https://www.rabbitmq.com/blog/2012/11/19/breaking-things-with-rabbitmq-3-0/
            // Setting `true` will cause a not-supported error
            immediate: false,
        };
        self.publish_with_options(envelope, options).await
    }

    /// Publish a message to RabbitMq.
    #[tracing::instrument(
        name = "publish",
        skip_all,
        fields(exchange = %envelope.exchange_name, routing_key = %envelope.routing_key)
    )]
    pub async fn publish_with_options(
        &self,
        envelope: MessageEnvelope,
        options: BasicPublishOptions,
    ) -> Result<(), PublisherError> {
        let envelope = inject_amqp_properties(envelope);
        self.retry
            .run(|_attempt| self.publish_once(&envelope, options))
            .await
    }

    /// A single attempt: lease a channel and publish, both under the same timeout.
    async fn publish_once(
        &self,
        envelope: &MessageEnvelope,
        options: BasicPublishOptions,
    ) -> Result<(), PublisherError> {
        let attempt = async {
            let channel = self.ensure_channel().await?;
            publish(
                &**channel,
                &envelope.payload,
                options,
                &envelope.exchange_name,
                &envelope.routing_key,
                envelope.properties.clone(),
            )
            .await
        };

        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(PublisherError::TimeoutError),
        }
    }

    /// Get an open channel, without waiting for the connection to come back if it is down.
    async fn ensure_channel(&self) -> Result<Object<ChannelManager>, PublisherError> {
        let channel = self
            .channel_pool
            .get()
            .await
            .map_err(|e| PublisherError::ChannelUnavailable(e.into()))?;
        if !channel.is_open() {
            // Don't hand it back to the pool.
            let _: PooledChannel = Object::take(channel);
            return Err(PublisherError::ChannelClosed);
        }
        Ok(channel)
    }
}

/// Error returned when trying to publish a message using `Publisher`.
#[derive(thiserror::Error, Debug)]
pub enum PublisherError {
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    GenericError(#[source] anyhow::Error),
    #[error("Failed to acquire a healthy channel from the pool")]
    ChannelUnavailable(#[source] crate::pool::Error),
    #[error("The channel was closed before publishing")]
    ChannelClosed,
    #[error("The timeout threshold was reached while trying to publish the message")]
    TimeoutError,
    #[error("The message could not be routed: {0:?}")]
    UnroutableMessage(Box<BasicReturnMessage>),
    #[error("The RabbitMq broker nacked the publishing of the message: {0:?}")]
    NegativeAck(Option<Box<BasicReturnMessage>>),
}

/// A builder for [`Publisher`].
///
/// Use [`Publisher::builder`] as entrypoint.
pub struct PublisherBuilder {
    channel_pool: ChannelPool,
    timeout: Duration,
    retry: RetryPolicy,
}

impl PublisherBuilder {
    fn new(channel_pool: ChannelPool) -> Self {
        Self {
            channel_pool,
            timeout: DEFAULT_PUBLISH_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Timeout applied to every publishing attempt.
    /// Defaults to 3 seconds if left unspecified.
    #[must_use]
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Defaults to [`RetryPolicy::default`].
    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Publisher {
        Publisher {
            channel_pool: self.channel_pool,
            timeout: self.timeout,
            retry: self.retry,
        }
    }
}

/// Publish a payload on a RabbitMq exchange, waiting for publisher confirmation from the
/// RabbitMq broker.
///
/// The mandatory flag tells the broker how to react if the message cannot be routed to a queue.
/// If this flag is `true`, the broker will return an unroutable message with a Return method.
/// If this flag is `false`, the broker silently drops the message.
#[tracing::instrument(level = "debug", skip(channel, payload, properties))]
async fn publish(
    channel: &dyn BrokerChannel,
    payload: &[u8],
    options: BasicPublishOptions,
    exchange: &str,
    routing_key: &str,
    properties: BasicProperties,
) -> Result<(), PublisherError> {
    let confirm = channel
        .basic_publish(exchange, routing_key, options, payload, properties)
        .await
        .map_err(PublisherError::GenericError)?;

    match confirm {
        Confirmation::Ack(ack) => {
            if let Some(return_message) = ack {
                // Reply Code 312 - NO_ROUTE
                // See https://www.rabbitmq.com/amqp-0-9-1-reference.html
                if return_message.reply_code == 312 {
                    return Err(PublisherError::UnroutableMessage(return_message));
                }
            }
            Ok(())
        }
        Confirmation::Nack(nack) => Err(PublisherError::NegativeAck(nack)),
        Confirmation::NotRequested => Ok(()),
    }
}

/// Fill in a timestamp, a message id and the persistent delivery mode when missing.
fn inject_amqp_properties(mut envelope: MessageEnvelope) -> MessageEnvelope {
    let current_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|ct| ct.as_secs());

    let props = envelope.properties;
    let props = if let Some(ct) = current_timestamp {
        let ts = *props.timestamp();
        props.with_timestamp(ts.unwrap_or(ct))
    } else {
        warn!("System time is before 1970");
        props
    };

    let message_id = props.message_id().clone();
    let props =
        props.with_message_id(message_id.unwrap_or_else(|| Uuid::new_v4().to_string().into()));

    let delivery_mode = *props.delivery_mode();
    envelope.properties = props.with_delivery_mode(delivery_mode.unwrap_or(PERSISTENT_DELIVERY_MODE));

    envelope
}
