//! Implements [`Manager`] for [`PooledChannel`].
use deadpool::managed::{self, Manager};
use std::ops::Deref;
use std::sync::Arc;

use crate::amqp::BrokerChannel;
use crate::connector::Connector;

/// `ChannelPool` pools [`PooledChannel`]s.
pub type ChannelPool = deadpool::managed::Pool<ChannelManager>;

/// A channel together with the generation of the connection it was opened on.
pub struct PooledChannel {
    channel: Arc<dyn BrokerChannel>,
    generation: u64,
}

impl PooledChannel {
    /// The generation of the connection the channel was opened on,
    /// see [`Connector::generation`].
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Deref for PooledChannel {
    type Target = dyn BrokerChannel;

    fn deref(&self) -> &Self::Target {
        self.channel.as_ref()
    }
}

/// `ChannelManager` implements [`Manager`] to lease channels from a [`Connector`].
pub struct ChannelManager {
    connector: Arc<Connector>,
    pub(crate) publisher_confirms: bool,
}

impl ChannelManager {
    /// By default, all channels have publisher confirmations enabled,
    /// opt out using [`ChannelManager::without_publisher_confirmations`].
    pub fn new(connector: Arc<Connector>) -> Self {
        Self {
            connector,
            publisher_confirms: true,
        }
    }

    /// Disable publisher confirmations.
    #[must_use]
    pub fn without_publisher_confirmations(mut self) -> Self {
        self.publisher_confirms = false;
        self
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }
}

#[async_trait::async_trait]
impl Manager for ChannelManager {
    type Type = PooledChannel;
    type Error = super::Error;

    async fn create(&self) -> Result<PooledChannel, super::Error> {
        let (channel, generation) = self.connector.lease_channel().await?;
        if self.publisher_confirms {
            channel.confirm_select().await?;
        }
        Ok(PooledChannel {
            channel,
            generation,
        })
    }

    async fn recycle(&self, obj: &mut PooledChannel) -> managed::RecycleResult<super::Error> {
        if !obj.channel.is_open() {
            return Err(managed::RecycleError::StaticMessage(
                "Channel is not in an healthy state",
            ));
        }
        match self.connector.generation() {
            Some(generation) if generation == obj.generation => Ok(()),
            current => Err(managed::RecycleError::Message(format!(
                "Channel belongs to connection {} but the live connection is {current:?}",
                obj.generation
            ))),
        }
    }
}
