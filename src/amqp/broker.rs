//! The subset of the AMQP protocol this crate relies on, expressed as traits.
//!
//! [`lapin`] provides the production implementations: [`BrokerChannel`] for [`lapin::Channel`],
//! [`BrokerConnection`] for [`AmqpConnection`](super::AmqpConnection) and [`Dialer`] for
//! [`ConnectionFactory`](super::ConnectionFactory).
//! Everything built on top (connector, pool, publisher, consumers) only talks to these traits.
use std::sync::Arc;

use amq_protocol_types::FieldTable;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, ChannelState, ExchangeKind};

use super::Delivery;

/// The messages pushed by the broker to a consumer.
///
/// The stream ends when the broker (or the connection) closes the underlying channel.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, anyhow::Error>>;

/// A lightweight session multiplexed over a [`BrokerConnection`].
#[async_trait::async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error>;

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error>;

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), anyhow::Error>;

    /// Register a consumer on `queue` and return the stream of its deliveries.
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<DeliveryStream, anyhow::Error>;

    /// Publish a message and wait for the broker confirmation, if confirmations are enabled
    /// on this channel.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<Confirmation, anyhow::Error>;

    /// Enable publisher confirmations.
    async fn confirm_select(&self) -> Result<(), anyhow::Error>;

    /// `false` once the channel has been closed, either by us, by the broker or because the
    /// underlying connection went away.
    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), anyhow::Error>;
}

/// The single logical link to the broker.
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, anyhow::Error>;

    fn is_connected(&self) -> bool;

    /// Wait for the next error notified asynchronously by the broker.
    ///
    /// Returns `None` when no further notification can arrive.
    async fn next_notification(&self) -> Option<anyhow::Error>;

    async fn close(&self);
}

/// Establishes new [`BrokerConnection`]s. One call is one dial attempt.
#[async_trait::async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self) -> Result<Arc<dyn BrokerConnection>, anyhow::Error>;
}

#[async_trait::async_trait]
impl BrokerChannel for lapin::Channel {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error> {
        lapin::Channel::exchange_declare(self, exchange, kind, options, arguments).await?;
        Ok(())
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error> {
        lapin::Channel::queue_declare(self, queue, options, arguments).await?;
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error> {
        lapin::Channel::queue_bind(self, queue, exchange, routing_key, options, arguments).await?;
        Ok(())
    }

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), anyhow::Error> {
        lapin::Channel::basic_qos(self, prefetch_count, options).await?;
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<DeliveryStream, anyhow::Error> {
        let consumer =
            lapin::Channel::basic_consume(self, queue, consumer_tag, options, arguments).await?;
        Ok(consumer
            .map(|delivery| delivery.map(Delivery::from).map_err(anyhow::Error::from))
            .boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<Confirmation, anyhow::Error> {
        let confirmation =
            lapin::Channel::basic_publish(self, exchange, routing_key, options, payload, properties)
                .await?
                .await?;
        Ok(confirmation)
    }

    async fn confirm_select(&self) -> Result<(), anyhow::Error> {
        lapin::Channel::confirm_select(self, ConfirmSelectOptions { nowait: false }).await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        matches!(self.status().state(), ChannelState::Connected)
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        lapin::Channel::close(self, 200, "OK").await?;
        Ok(())
    }
}
