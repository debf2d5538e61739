use amq_protocol_types::{DeliveryTag, ShortString};
use lapin::options::BasicAckOptions;
use lapin::BasicProperties;

/// Confirms to the broker that a delivered message has been handled.
#[async_trait::async_trait]
pub trait Acknowledger: Send + Sync + 'static {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), anyhow::Error>;
}

#[async_trait::async_trait]
impl Acknowledger for lapin::acker::Acker {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), anyhow::Error> {
        lapin::acker::Acker::ack(self, options)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }
}

/// A received AMQP message.
pub struct Delivery {
    /// The delivery tag of the message.
    pub delivery_tag: DeliveryTag,

    /// The exchange of the message. Empty if the default exchange is used.
    pub exchange: ShortString,

    /// The routing key of the message. Empty if no routing key was specified.
    pub routing_key: ShortString,

    /// Whether this message was redelivered.
    pub redelivered: bool,

    /// Contains the properties and the headers of the message.
    pub properties: BasicProperties,

    /// The payload of the message in binary format.
    pub data: Vec<u8>,

    // Not public: a message must be acked exactly once and only the consume loop does it.
    // https://www.rabbitmq.com/amqp-0-9-1-reference.html#basic.ack.delivery-tag
    pub(crate) acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Build a delivery from its payload and the handle used to acknowledge it.
    ///
    /// Mostly useful to implement [`BrokerChannel`](super::BrokerChannel) for something
    /// other than a `lapin` channel.
    pub fn new(delivery_tag: DeliveryTag, data: Vec<u8>, acker: impl Acknowledger) -> Self {
        Self {
            delivery_tag,
            exchange: ShortString::from(String::new()),
            routing_key: ShortString::from(String::new()),
            redelivered: false,
            properties: BasicProperties::default(),
            data,
            acker: Box::new(acker),
        }
    }

    #[must_use]
    pub fn with_exchange(mut self, exchange: &str) -> Self {
        self.exchange = exchange.into();
        self
    }

    #[must_use]
    pub fn with_routing_key(mut self, routing_key: &str) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = properties;
        self
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("properties", &self.properties)
            .field("data", &self.data.len())
            .finish()
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            exchange: value.exchange,
            routing_key: value.routing_key,
            redelivered: value.redelivered,
            properties: value.properties,
            data: value.data,
            acker: Box::new(value.acker),
        }
    }
}
