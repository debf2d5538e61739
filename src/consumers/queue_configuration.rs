use amq_protocol_types::{AMQPValue, FieldTable, ShortString};
use lapin::options::{QueueBindOptions, QueueDeclareOptions};

const MAX_PRIORITY_ARGUMENT: &str = "x-max-priority";
// AMQP short strings are at most 255 bytes long.
const MAX_ROUTING_KEY_LENGTH: usize = 255;

/// How a [`Consumer`](super::Consumer) declares its queue and binds it to the exchange.
///
/// Immutable once built: use [`QueueConfiguration::builder`].
/// The default configuration declares a durable, non-exclusive, non-auto-deleted queue bound
/// with an empty routing key.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfiguration {
    durable: bool,
    auto_delete: bool,
    exclusive: bool,
    no_wait: bool,
    routing_key: String,
    arguments: FieldTable,
}

impl Default for QueueConfiguration {
    fn default() -> Self {
        Self {
            durable: true,
            auto_delete: false,
            exclusive: false,
            no_wait: false,
            routing_key: String::new(),
            arguments: FieldTable::default(),
        }
    }
}

impl QueueConfiguration {
    pub fn builder() -> QueueConfigurationBuilder {
        QueueConfigurationBuilder(Self::default())
    }

    pub fn durable(&self) -> bool {
        self.durable
    }

    pub fn auto_delete(&self) -> bool {
        self.auto_delete
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn no_wait(&self) -> bool {
        self.no_wait
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Used both to declare the queue and to bind it.
    pub fn arguments(&self) -> &FieldTable {
        &self.arguments
    }

    pub fn max_priority(&self) -> Option<u8> {
        match self
            .arguments
            .inner()
            .get(&ShortString::from(MAX_PRIORITY_ARGUMENT))
        {
            Some(AMQPValue::ShortShortUInt(priority)) => Some(*priority),
            _ => None,
        }
    }

    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            passive: false,
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.auto_delete,
            nowait: self.no_wait,
        }
    }

    pub(crate) fn bind_options(&self) -> QueueBindOptions {
        QueueBindOptions {
            nowait: self.no_wait,
        }
    }
}

/// A builder for [`QueueConfiguration`].
///
/// ```rust
/// use rabbit_resilience::consumers::QueueConfiguration;
///
/// let configuration = QueueConfiguration::builder()
///     .routing_key("test")
///     .durable(false)
///     .auto_delete(true)
///     .max_priority(100)
///     .build()
///     .unwrap();
///
/// assert_eq!(configuration.max_priority(), Some(100));
/// ```
#[derive(Debug, Clone)]
pub struct QueueConfigurationBuilder(QueueConfiguration);

impl QueueConfigurationBuilder {
    #[must_use]
    pub fn durable(mut self, durable: bool) -> Self {
        self.0.durable = durable;
        self
    }

    /// Delete the queue once its last consumer is gone.
    #[must_use]
    pub fn auto_delete(mut self, auto_delete: bool) -> Self {
        self.0.auto_delete = auto_delete;
        self
    }

    /// Only the declaring connection can use the queue; deleted when that connection closes.
    #[must_use]
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.0.exclusive = exclusive;
        self
    }

    /// Do not wait for the broker to confirm the queue declaration and binding.
    #[must_use]
    pub fn no_wait(mut self, no_wait: bool) -> Self {
        self.0.no_wait = no_wait;
        self
    }

    /// The routing key used to bind the queue to the exchange.
    #[must_use]
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.0.routing_key = routing_key.into();
        self
    }

    /// Turn the queue into a [priority queue](https://www.rabbitmq.com/priority.html).
    #[must_use]
    pub fn max_priority(self, max_priority: u8) -> Self {
        self.argument(MAX_PRIORITY_ARGUMENT, AMQPValue::ShortShortUInt(max_priority))
    }

    /// Add an entry to the argument table, replacing any previous value for `key`.
    #[must_use]
    pub fn argument(mut self, key: &str, value: AMQPValue) -> Self {
        self.0.arguments.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<QueueConfiguration, QueueConfigurationError> {
        let configuration = self.0;
        if configuration.routing_key.len() > MAX_ROUTING_KEY_LENGTH {
            return Err(QueueConfigurationError::RoutingKeyTooLong(
                configuration.routing_key.len(),
            ));
        }
        if configuration.max_priority() == Some(0) {
            return Err(QueueConfigurationError::InvalidMaxPriority);
        }
        Ok(configuration)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum QueueConfigurationError {
    #[error("The routing key is {0} bytes long, at most 255 are allowed")]
    RoutingKeyTooLong(usize),
    #[error("The maximum priority of a queue must be at least 1")]
    InvalidMaxPriority,
}
