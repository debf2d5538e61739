use amq_protocol_types::{FieldTable, ShortShortUInt, ShortString, Timestamp};

use crate::amqp::BasicProperties;

/// A message to be published via [`Publisher`](super::Publisher).
///
/// Built once per publish call; the publisher clones it for every retried attempt.
#[derive(Clone, Debug, Default)]
pub struct MessageEnvelope {
    /// The body of the message.
    pub payload: Vec<u8>,
    /// The exchange the message is published to.
    pub exchange_name: String,
    /// Used by the exchange to route the message to the bound queues.
    pub routing_key: String,
    /// AMQP properties and headers attached to the message.
    pub properties: BasicProperties,
}

impl MessageEnvelope {
    pub fn new(
        exchange_name: impl Into<String>,
        routing_key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            payload: payload.into(),
            exchange_name: exchange_name.into(),
            routing_key: routing_key.into(),
            properties: BasicProperties::default(),
        }
    }

    #[must_use]
    pub fn with_payload(mut self, value: Vec<u8>) -> Self {
        self.payload = value;
        self
    }

    #[must_use]
    pub fn with_exchange_name(mut self, value: String) -> Self {
        self.exchange_name = value;
        self
    }

    #[must_use]
    pub fn with_routing_key(mut self, value: String) -> Self {
        self.routing_key = value;
        self
    }

    fn props(mut self, f: impl FnOnce(BasicProperties) -> BasicProperties) -> Self {
        self.properties = f(self.properties);
        self
    }

    #[must_use]
    pub fn with_priority(self, value: ShortShortUInt) -> Self {
        self.props(|p| p.with_priority(value))
    }

    #[must_use]
    pub fn with_content_type(self, value: ShortString) -> Self {
        self.props(|p| p.with_content_type(value))
    }

    #[must_use]
    pub fn with_headers(self, value: FieldTable) -> Self {
        self.props(|p| p.with_headers(value))
    }

    /// Non-persistent (1) or persistent (2). Messages are published as persistent unless set.
    #[must_use]
    pub fn with_delivery_mode(self, value: ShortShortUInt) -> Self {
        self.props(|p| p.with_delivery_mode(value))
    }

    #[must_use]
    pub fn with_correlation_id(self, value: ShortString) -> Self {
        self.props(|p| p.with_correlation_id(value))
    }

    #[must_use]
    pub fn with_expiration(self, value: ShortString) -> Self {
        self.props(|p| p.with_expiration(value))
    }

    #[must_use]
    pub fn with_message_id(self, value: ShortString) -> Self {
        self.props(|p| p.with_message_id(value))
    }

    #[must_use]
    pub fn with_timestamp(self, value: Timestamp) -> Self {
        self.props(|p| p.with_timestamp(value))
    }

    #[must_use]
    pub fn with_type(self, value: ShortString) -> Self {
        self.props(|p| p.with_type(value))
    }

    #[must_use]
    pub fn with_app_id(self, value: ShortString) -> Self {
        self.props(|p| p.with_app_id(value))
    }
}
