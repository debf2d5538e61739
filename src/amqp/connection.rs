use std::sync::Arc;

use lapin::ConnectionState;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use super::{BrokerChannel, BrokerConnection};

/// A [`lapin::Connection`] whose asynchronous errors are queued up as notifications.
pub struct AmqpConnection {
    inner: lapin::Connection,
    notifications: Mutex<mpsc::UnboundedReceiver<lapin::Error>>,
}

impl AmqpConnection {
    pub fn new(connection: lapin::Connection) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        connection.on_error(move |e| {
            warn!("RabbitMQ broken connection: {:?}", e);
            let _ = sender.send(e);
        });
        Self {
            inner: connection,
            notifications: Mutex::new(receiver),
        }
    }

    /// Access the underlying `lapin` connection.
    pub fn raw(&self) -> &lapin::Connection {
        &self.inner
    }
}

#[async_trait::async_trait]
impl BrokerConnection for AmqpConnection {
    #[tracing::instrument(name = "rabbitmq_create_channel", skip(self))]
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, anyhow::Error> {
        let channel = self.inner.create_channel().await?;
        Ok(Arc::new(channel))
    }

    fn is_connected(&self) -> bool {
        matches!(self.inner.status().state(), ConnectionState::Connected)
    }

    async fn next_notification(&self) -> Option<anyhow::Error> {
        self.notifications.lock().await.recv().await.map(Into::into)
    }

    async fn close(&self) {
        if let Err(e) = self.inner.close(200, "OK").await {
            warn!("Failed to close RabbitMQ connection: {:?}", e);
        }
    }
}
