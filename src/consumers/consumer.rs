use crate::amqp::options::{BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions};
use crate::amqp::types::FieldTable;
use crate::amqp::{BrokerChannel, ExchangeKind};
use crate::consumers::{process_delivery, ConsumerError, Job, QueueConfiguration};
use futures_util::{FutureExt, StreamExt};
use shutdown_handler::{ShutdownHandler, ShutdownSignal};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Where a [`Consumer`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// No consume loop is running.
    Idle,
    /// At least one consume loop is running.
    Running,
    /// [`Consumer::stop`] was accepted. Final.
    Stopped,
}

/// Binds a [`Job`] to a queue: declares the topology, then pulls messages and hands them
/// to the job one at a time.
///
/// # Usage
///
/// [`Consumer::declare`] must complete before [`Consumer::consume`] is called on the same channel.
/// `consume` never restarts on its own: once it returns, start again on a fresh channel
/// (or let a [`ConsumerGroup`](super::ConsumerGroup) do it for you).
///
/// # At-least-once, ack-always
///
/// The prefetch count is 1 and every message is acked after the job is done with it, whatever
/// the outcome. Failed messages are logged and dropped, never requeued.
pub struct Consumer {
    exchange_name: String,
    queue_name: String,
    configuration: QueueConfiguration,
    job: Arc<dyn Job>,
    stop: ShutdownHandler,
    running: AtomicUsize,
    supervisors: AtomicUsize,
}

impl Consumer {
    pub fn new(
        exchange_name: impl Into<String>,
        queue_name: impl Into<String>,
        job: impl Job,
        configuration: QueueConfiguration,
    ) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            queue_name: queue_name.into(),
            configuration,
            job: Arc::new(job),
            stop: ShutdownHandler::new(),
            running: AtomicUsize::new(0),
            supervisors: AtomicUsize::new(0),
        }
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn configuration(&self) -> &QueueConfiguration {
        &self.configuration
    }

    pub fn state(&self) -> ConsumerState {
        if is_signalled(&self.stop) {
            ConsumerState::Stopped
        } else if self.running.load(Ordering::SeqCst) > 0 {
            ConsumerState::Running
        } else {
            ConsumerState::Idle
        }
    }

    /// Declare the exchange, declare the queue and bind them together, in this order.
    ///
    /// The exchange is always a non-durable, non-auto-deleted, non-internal topic exchange:
    /// only the queue can be configured.
    /// Stops at the first failure, without rolling back the steps that succeeded.
    #[tracing::instrument(
        name = "consumer_declare",
        skip_all,
        fields(exchange = %self.exchange_name, queue = %self.queue_name)
    )]
    pub async fn declare(&self, channel: &dyn BrokerChannel) -> Result<(), ConsumerError> {
        let exchange_options = ExchangeDeclareOptions {
            passive: false,
            durable: false,
            auto_delete: false,
            internal: false,
            nowait: false,
        };
        channel
            .exchange_declare(
                &self.exchange_name,
                ExchangeKind::Topic,
                exchange_options,
                FieldTable::default(),
            )
            .await
            .map_err(|source| {
                tracing::error!(error = ?source, "Failed to declare exchange");
                ConsumerError::DeclareExchange {
                    exchange: self.exchange_name.clone(),
                    source,
                }
            })?;

        channel
            .queue_declare(
                &self.queue_name,
                self.configuration.declare_options(),
                self.configuration.arguments().clone(),
            )
            .await
            .map_err(|source| {
                tracing::error!(error = ?source, "Failed to declare queue");
                ConsumerError::DeclareQueue {
                    queue: self.queue_name.clone(),
                    source,
                }
            })?;

        channel
            .queue_bind(
                &self.queue_name,
                &self.exchange_name,
                self.configuration.routing_key(),
                self.configuration.bind_options(),
                self.configuration.arguments().clone(),
            )
            .await
            .map_err(|source| {
                tracing::error!(
                    error = ?source,
                    routing_key = self.configuration.routing_key(),
                    "Failed to bind queue"
                );
                ConsumerError::BindQueue {
                    queue: self.queue_name.clone(),
                    exchange: self.exchange_name.clone(),
                    routing_key: self.configuration.routing_key().to_owned(),
                    source,
                }
            })?;

        Ok(())
    }

    /// Pull messages from the queue and process them until:
    /// - [`Consumer::stop`] is called, returning `Ok(())`;
    /// - `cancel` resolves, returning [`ConsumerError::Cancelled`];
    /// - the broker closes the delivery stream, returning [`ConsumerError::DeliveryStreamClosed`].
    ///
    /// A message being processed when the loop is asked to exit is processed and acked first.
    /// Returns `Ok(())` straight away if the consumer has already been stopped.
    #[tracing::instrument(
        name = "consumer_run",
        skip_all,
        fields(exchange = %self.exchange_name, queue = %self.queue_name)
    )]
    pub async fn consume(
        &self,
        channel: &dyn BrokerChannel,
        cancel: impl Future<Output = ()>,
    ) -> Result<(), ConsumerError> {
        if is_signalled(&self.stop) {
            tracing::debug!("Consumer already stopped");
            return Ok(());
        }
        let _running = RunningGuard::enter(&self.running);

        let result = self.run_loop(channel, cancel).await;
        tracing::info!("consume method finished");
        result
    }

    async fn run_loop(
        &self,
        channel: &dyn BrokerChannel,
        cancel: impl Future<Output = ()>,
    ) -> Result<(), ConsumerError> {
        // One unacked message at a time: processing is sequential and in delivery order.
        channel
            .basic_qos(1, BasicQosOptions { global: false })
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "Failed to set channel prefetch count");
                ConsumerError::Qos(e)
            })?;

        let consume_options = BasicConsumeOptions {
            no_local: false,
            no_ack: false,
            exclusive: false,
            nowait: false,
        };
        let mut deliveries = channel
            .basic_consume(
                &self.queue_name,
                &Uuid::new_v4().to_string(),
                consume_options,
                FieldTable::default(),
            )
            .await
            .map_err(|source| {
                tracing::error!(error = ?source, "Failed to start consuming");
                ConsumerError::Consume {
                    queue: self.queue_name.clone(),
                    source,
                }
            })?;

        tokio::pin!(cancel);

        loop {
            // The stop signal can be raised while a message is being processed.
            if is_signalled(&self.stop) {
                tracing::info!("Consumer stopped");
                return Ok(());
            }

            tokio::select! {
                biased;

                _ = self.stop.wait_for_signal() => {
                    tracing::info!("Consumer stopped");
                    return Ok(());
                }
                _ = &mut cancel => {
                    tracing::info!("Consumer cancelled");
                    return Err(ConsumerError::Cancelled);
                }
                delivery = deliveries.next() => match delivery {
                    None => {
                        tracing::error!("Delivery stream closed");
                        return Err(ConsumerError::DeliveryStreamClosed);
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = ?e, "Consumer error");
                        return Err(ConsumerError::Delivery(e));
                    }
                    Some(Ok(delivery)) => {
                        // Processed inline: the next delivery is not pulled until this one is acked.
                        process_delivery(delivery, Arc::clone(&self.job)).await;
                    }
                },
            }
        }
    }

    /// Ask every running consume loop to return.
    ///
    /// Idempotent. A no-op if no loop is running and no [`ConsumerGroup`](super::ConsumerGroup)
    /// is keeping the consumer alive: it does not prevent a later `consume` call.
    /// Once accepted the consumer stays stopped, later `consume` calls return straight away.
    pub fn stop(&self) {
        if is_signalled(&self.stop) {
            return;
        }
        if self.running.load(Ordering::SeqCst) == 0 && self.supervisors.load(Ordering::SeqCst) == 0
        {
            tracing::debug!(queue = %self.queue_name, "No consume loop running, ignoring stop");
            return;
        }
        self.stop.shutdown();
    }

    /// Resolves once the consumer has been stopped.
    pub(crate) fn stopped(&self) -> ShutdownSignal<'_> {
        self.stop.wait_for_signal()
    }

    /// Registers a supervisor that restarts consume loops: while it is alive, `stop` is honoured
    /// even in between two loops.
    pub(crate) fn supervise(&self) -> RunningGuard<'_> {
        RunningGuard::enter(&self.supervisors)
    }
}

/// `true` if `handler` has already been signalled. Never waits.
pub(crate) fn is_signalled(handler: &ShutdownHandler) -> bool {
    handler.wait_for_signal().now_or_never().is_some()
}

/// Keeps a counter incremented for as long as it is alive.
pub(crate) struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
