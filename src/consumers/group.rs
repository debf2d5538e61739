use crate::connector::Connector;
use crate::consumers::consumer::is_signalled;
use crate::consumers::{Consumer, ConsumerError, ConsumerState};
use futures_util::{stream::FuturesUnordered, StreamExt};
use shutdown_handler::ShutdownHandler;
use std::sync::Arc;

/// A collection of [`Consumer`]s sharing the same [`Connector`].
///
/// `ConsumerGroup` keeps its consumers alive across connection failures: every consume loop
/// runs on its own channel and, whenever it dies (broker closed the channel, connection lost,
/// declare failed), it is started again on a fresh channel once the connector is back up.
///
/// # How do I build a `ConsumerGroup`?
///
/// The starting point is [`ConsumerGroup::builder`].
///
/// ```rust,no_run
/// use rabbit_resilience::consumers::{Consumer, ConsumerGroup, Job, QueueConfiguration};
/// use rabbit_resilience::connector::Connector;
/// use std::sync::Arc;
///
/// struct Print;
///
/// #[async_trait::async_trait]
/// impl Job for Print {
///     async fn process(&self, payload: &[u8]) -> Result<(), anyhow::Error> {
///         println!("{}", String::from_utf8_lossy(payload));
///         Ok(())
///     }
/// }
///
/// async fn run(connector: Arc<Connector>) -> anyhow::Result<()> {
///     let consumer = Consumer::new("eventbus", "printer", Print, QueueConfiguration::default());
///     ConsumerGroup::builder(connector)
///         .consumer(Arc::new(consumer), 2)
///         .build()
///         .run_until_sigterm()
///         .await
/// }
/// ```
pub struct ConsumerGroup {
    connector: Arc<Connector>,
    consumers: Vec<(Arc<Consumer>, usize)>,
}

impl ConsumerGroup {
    pub fn builder(connector: Arc<Connector>) -> ConsumerGroupBuilder {
        ConsumerGroupBuilder {
            connector,
            consumers: Vec::new(),
        }
    }

    /// You can call `run_until_sigterm` to start consuming messages from the queues you bound.
    /// As the name implies, `run_until_sigterm` returns control to the caller only if:
    /// - all consumers have been stopped;
    /// - one of the consume loops panicked;
    /// - the application is stopped via SIGTERM.
    pub async fn run_until_sigterm(self) -> Result<(), anyhow::Error> {
        self.run_until_shutdown(ShutdownHandler::sigterm()?).await
    }

    /// You can call `run_until_shutdown` to start consuming messages from the queues you bound.
    /// As the name implies, `run_until_shutdown` returns control to the caller only if:
    /// - all consumers have been stopped;
    /// - one of the consume loops panicked;
    /// - the application is stopped via the shutdown handler.
    #[tracing::instrument(skip_all, name = "consumer_group_run")]
    pub async fn run_until_shutdown(
        self,
        shutdown: Arc<ShutdownHandler>,
    ) -> Result<(), anyhow::Error> {
        let mut instances = FuturesUnordered::new();
        for (consumer, count) in self.consumers {
            for _ in 0..count {
                let instance = run_instance(
                    Arc::clone(&self.connector),
                    Arc::clone(&consumer),
                    Arc::clone(&shutdown),
                );
                instances.push(tokio::spawn(instance));
            }
        }

        // wait for all instances to finish
        while let Some(res) = instances.next().await {
            if let Err(e) = res {
                tracing::error!("Consumer failed: {}", e);
                shutdown.shutdown();
            }
        }
        Ok(())
    }
}

/// Keep one consume loop of `consumer` alive until the consumer is stopped or `shutdown` fires.
#[tracing::instrument(skip_all, fields(queue = %consumer.queue_name()))]
async fn run_instance(
    connector: Arc<Connector>,
    consumer: Arc<Consumer>,
    shutdown: Arc<ShutdownHandler>,
) {
    let _supervisor = consumer.supervise();
    loop {
        if is_signalled(&shutdown) || consumer.state() == ConsumerState::Stopped {
            return;
        }
        if connector
            .wait_until_connected(stopped_or_shutdown(&consumer, &shutdown))
            .await
            .is_err()
        {
            return;
        }

        match run_once(&connector, &consumer, &shutdown).await {
            Ok(()) | Err(ConsumerError::Cancelled) => return,
            Err(e) => {
                tracing::warn!(error = ?e, "Consume loop terminated, restarting it");
            }
        }

        tokio::select! {
            _ = stopped_or_shutdown(&consumer, &shutdown) => return,
            _ = tokio::time::sleep(connector.config().reconnect_wait) => {}
        }
    }
}

async fn stopped_or_shutdown(consumer: &Consumer, shutdown: &ShutdownHandler) {
    tokio::select! {
        _ = consumer.stopped() => {}
        _ = shutdown.wait_for_signal() => {}
    }
}

async fn run_once(
    connector: &Connector,
    consumer: &Consumer,
    shutdown: &ShutdownHandler,
) -> Result<(), ConsumerError> {
    let channel = connector.create_channel().await.map_err(|e| {
        ConsumerError::Consume {
            queue: consumer.queue_name().to_owned(),
            source: e.into(),
        }
    })?;

    let result = async {
        consumer.declare(channel.as_ref()).await?;
        consumer
            .consume(channel.as_ref(), shutdown.wait_for_signal())
            .await
    }
    .await;

    if let Err(e) = channel.close().await {
        tracing::debug!(error = ?e, "Failed to close consumer channel");
    }
    result
}

/// A builder to register consumers in a [`ConsumerGroup`].
///
/// Use [`ConsumerGroup::builder`] as entrypoint.
pub struct ConsumerGroupBuilder {
    connector: Arc<Connector>,
    consumers: Vec<(Arc<Consumer>, usize)>,
}

impl ConsumerGroupBuilder {
    /// Run `instances` concurrent consume loops for `consumer`, each on its own channel.
    ///
    /// Stopping the consumer stops all of them.
    #[must_use]
    pub fn consumer(mut self, consumer: Arc<Consumer>, instances: usize) -> Self {
        self.consumers.push((consumer, instances));
        self
    }

    pub fn build(self) -> ConsumerGroup {
        ConsumerGroup {
            connector: self.connector,
            consumers: self.consumers,
        }
    }
}
