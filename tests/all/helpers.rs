//! In-memory doubles of the broker, recording every operation they are asked to perform.
#![allow(dead_code)]
use amq_protocol_types::{DeliveryTag, FieldTable};
use futures_util::StreamExt;
use rabbit_resilience::amqp::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use rabbit_resilience::amqp::{
    Acknowledger, BasicProperties, BrokerChannel, BrokerConnection, Confirmation, Delivery,
    DeliveryStream, Dialer, ExchangeKind,
};
use rabbit_resilience::connector::{Connector, ConnectorConfig};
use rabbit_resilience::consumers::Job;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A shared, ordered log of what happened.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn record(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }
}

/// Knobs and observations shared by every fake spawned from the same broker.
#[derive(Default)]
pub struct FakeBroker {
    pub recorder: Recorder,
    dial_failures: AtomicU32,
    dial_attempts: AtomicU32,
    publish_failures: AtomicU32,
    publish_attempts: AtomicU32,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    published: Mutex<Vec<Published>>,
}

#[derive(Debug, Clone)]
pub struct Published {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub options: BasicPublishOptions,
    pub properties: BasicProperties,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `failures` dial attempts fail.
    pub fn fail_dials(&self, failures: u32) {
        self.dial_failures.store(failures, Ordering::SeqCst);
    }

    /// The next `failures` publishes fail. `u32::MAX` makes every publish fail.
    pub fn fail_publishes(&self, failures: u32) {
        self.publish_failures.store(failures, Ordering::SeqCst);
    }

    pub fn dial_attempts(&self) -> u32 {
        self.dial_attempts.load(Ordering::SeqCst)
    }

    pub fn publish_attempts(&self) -> u32 {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn dialer(self: &Arc<Self>) -> FakeDialer {
        FakeDialer(Arc::clone(self))
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
                0 => None,
                u32::MAX => Some(u32::MAX),
                remaining => Some(remaining - 1),
            })
            .is_ok()
    }
}

#[derive(Clone)]
pub struct FakeDialer(Arc<FakeBroker>);

#[async_trait::async_trait]
impl Dialer for FakeDialer {
    async fn dial(&self) -> Result<Arc<dyn BrokerConnection>, anyhow::Error> {
        self.0.dial_attempts.fetch_add(1, Ordering::SeqCst);
        if FakeBroker::take_failure(&self.0.dial_failures) {
            return Err(anyhow::anyhow!("connection refused"));
        }
        let connection = Arc::new(FakeConnection::new(Arc::clone(&self.0)));
        self.0
            .connections
            .lock()
            .unwrap()
            .push(Arc::clone(&connection));
        Ok(connection)
    }
}

pub struct FakeConnection {
    broker: Arc<FakeBroker>,
    connected: AtomicBool,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    notifier: mpsc::UnboundedSender<anyhow::Error>,
    notifications: tokio::sync::Mutex<mpsc::UnboundedReceiver<anyhow::Error>>,
}

impl FakeConnection {
    fn new(broker: Arc<FakeBroker>) -> Self {
        let (notifier, notifications) = mpsc::unbounded_channel();
        Self {
            broker,
            connected: AtomicBool::new(true),
            channels: Mutex::new(Vec::new()),
            notifier,
            notifications: tokio::sync::Mutex::new(notifications),
        }
    }

    /// Simulate the connection being dropped by the network.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        for channel in self.channels() {
            channel.close_locally();
        }
    }

    /// Like [`FakeConnection::disconnect`], but its channels still report themselves as open.
    pub fn disconnect_leaving_channels_open(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Simulate an error notified by the broker out of band.
    pub fn notify(&self, error: anyhow::Error) {
        let _ = self.notifier.send(error);
    }

    pub fn channels(&self) -> Vec<Arc<FakeChannel>> {
        self.channels.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl BrokerConnection for FakeConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, anyhow::Error> {
        let channel = Arc::new(FakeChannel::with_broker(Arc::clone(&self.broker)));
        self.channels.lock().unwrap().push(Arc::clone(&channel));
        self.broker.recorder.record("create_channel");
        Ok(channel)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn next_notification(&self) -> Option<anyhow::Error> {
        self.notifications.lock().await.recv().await
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.broker.recorder.record("close_connection");
    }
}

/// Operations of [`FakeChannel`] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ExchangeDeclare,
    QueueDeclare,
    QueueBind,
    BasicQos,
    BasicConsume,
}

pub struct FakeChannel {
    broker: Arc<FakeBroker>,
    open: AtomicBool,
    failing: Mutex<HashSet<Operation>>,
    sender: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    pub exchange_declared: Mutex<Option<(String, ExchangeKind, ExchangeDeclareOptions)>>,
    pub queue_declared: Mutex<Option<(String, QueueDeclareOptions, FieldTable)>>,
    pub queue_bound: Mutex<Option<(String, String, QueueBindOptions, FieldTable)>>,
    pub consume_options: Mutex<Option<BasicConsumeOptions>>,
    pub consumer_tags: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::with_broker(FakeBroker::new())
    }

    fn with_broker(broker: Arc<FakeBroker>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            broker,
            open: AtomicBool::new(true),
            failing: Mutex::new(HashSet::new()),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            exchange_declared: Mutex::new(None),
            queue_declared: Mutex::new(None),
            queue_bound: Mutex::new(None),
            consume_options: Mutex::new(None),
            consumer_tags: Mutex::new(Vec::new()),
        }
    }

    pub fn recorder(&self) -> Recorder {
        self.broker.recorder.clone()
    }

    pub fn fail(&self, operation: Operation) {
        self.failing.lock().unwrap().insert(operation);
    }

    /// Push a message to the consumer registered on this channel.
    /// Recorded as `undelivered` if nobody is consuming anymore or the channel is closed.
    pub fn deliver(&self, delivery_tag: DeliveryTag, payload: &str) {
        self.deliver_with_properties(delivery_tag, payload, BasicProperties::default(), false);
    }

    pub fn deliver_with_properties(
        &self,
        delivery_tag: DeliveryTag,
        payload: &str,
        properties: BasicProperties,
        failing_ack: bool,
    ) {
        let acker = FakeAcker::new(delivery_tag, self.recorder(), failing_ack);
        let delivery = Delivery::new(delivery_tag, payload.as_bytes().to_vec(), acker)
            .with_properties(properties);
        let delivered = match self.sender.lock().unwrap().as_ref() {
            Some(sender) => sender.send(delivery).is_ok(),
            None => false,
        };
        if !delivered {
            self.recorder()
                .record(format!("undelivered:{delivery_tag}"));
        }
    }

    /// Simulate the broker closing the channel: the delivery stream ends.
    pub fn close_locally(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
    }

    fn check(&self, operation: Operation, event: String) -> Result<(), anyhow::Error> {
        self.recorder().record(event);
        if self.failing.lock().unwrap().contains(&operation) {
            return Err(anyhow::anyhow!("{operation:?} failed"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BrokerChannel for FakeChannel {
    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        _arguments: FieldTable,
    ) -> Result<(), anyhow::Error> {
        self.check(
            Operation::ExchangeDeclare,
            format!("exchange_declare:{exchange}"),
        )?;
        *self.exchange_declared.lock().unwrap() = Some((exchange.to_owned(), kind, options));
        Ok(())
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error> {
        self.check(Operation::QueueDeclare, format!("queue_declare:{queue}"))?;
        *self.queue_declared.lock().unwrap() = Some((queue.to_owned(), options, arguments));
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
        self.check(
            Operation::QueueBind,
            format!("queue_bind:{queue}:{exchange}:{routing_key}"),
        )?;
        *self.queue_bound.lock().unwrap() = Some((
            exchange.to_owned(),
            routing_key.to_owned(),
            options,
            arguments,
        ));
        Ok(())
    }

    async fn basic_qos(
        &self,
        prefetch_count: u16,
        options: BasicQosOptions,
    ) -> Result<(), anyhow::Error> {
        self.check(
            Operation::BasicQos,
            format!("basic_qos:{prefetch_count}:{}", options.global),
        )
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        _arguments: FieldTable,
    ) -> Result<DeliveryStream, anyhow::Error> {
        self.check(Operation::BasicConsume, format!("basic_consume:{queue}"))?;
        *self.consume_options.lock().unwrap() = Some(options);
        self.consumer_tags
            .lock()
            .unwrap()
            .push(consumer_tag.to_owned());

        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow::anyhow!("A consumer is already registered"))?;
        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|delivery| (Ok(delivery), receiver))
        });
        Ok(stream.boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<Confirmation, anyhow::Error> {
        self.broker.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if FakeBroker::take_failure(&self.broker.publish_failures) {
            return Err(anyhow::anyhow!("publish failed"));
        }
        self.broker.published.lock().unwrap().push(Published {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            payload: payload.to_vec(),
            options,
            properties,
        });
        Ok(Confirmation::NotRequested)
    }

    async fn confirm_select(&self) -> Result<(), anyhow::Error> {
        self.recorder().record("confirm_select");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        self.close_locally();
        Ok(())
    }
}

pub struct FakeAcker {
    delivery_tag: DeliveryTag,
    recorder: Recorder,
    fail: bool,
}

impl FakeAcker {
    pub fn new(delivery_tag: DeliveryTag, recorder: Recorder, fail: bool) -> Self {
        Self {
            delivery_tag,
            recorder,
            fail,
        }
    }
}

#[async_trait::async_trait]
impl Acknowledger for FakeAcker {
    async fn ack(&self, options: BasicAckOptions) -> Result<(), anyhow::Error> {
        if options.multiple {
            self.recorder
                .record(format!("ack_multiple:{}", self.delivery_tag));
        } else {
            self.recorder.record(format!("ack:{}", self.delivery_tag));
        }
        if self.fail {
            return Err(anyhow::anyhow!("ack failed"));
        }
        Ok(())
    }
}

/// Records every payload it processes. Fails on "fail", panics on "panic".
pub struct RecordingJob(pub Recorder);

#[async_trait::async_trait]
impl Job for RecordingJob {
    async fn process(&self, payload: &[u8]) -> Result<(), anyhow::Error> {
        let payload = String::from_utf8_lossy(payload).into_owned();
        self.0.record(format!("process:{payload}"));
        match payload.as_str() {
            "fail" => Err(anyhow::anyhow!("failed to process {payload}")),
            "panic" => panic!("boom"),
            _ => Ok(()),
        }
    }
}

pub fn fast_connector_config(reconnect_attempts: u32) -> ConnectorConfig {
    ConnectorConfig::default()
        .with_reconnect_attempts(reconnect_attempts)
        .with_reconnect_wait(Duration::from_millis(1))
        .with_liveness_check_interval(Duration::from_millis(5))
}

/// A connector over `broker`, already connected and kept alive until the returned sender fires.
pub async fn connected_connector(
    broker: &Arc<FakeBroker>,
) -> (Arc<Connector>, tokio::sync::oneshot::Sender<()>) {
    connected_connector_with(broker, fast_connector_config(5)).await
}

pub async fn connected_connector_with(
    broker: &Arc<FakeBroker>,
    config: ConnectorConfig,
) -> (Arc<Connector>, tokio::sync::oneshot::Sender<()>) {
    let connector = Arc::new(Connector::new(broker.dialer(), config));
    let (shutdown, on_shutdown) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn({
        let connector = Arc::clone(&connector);
        async move {
            connector
                .dial(async move {
                    let _ = on_shutdown.await;
                })
                .await
        }
    });
    connector
        .wait_until_connected(std::future::pending())
        .await
        .unwrap();
    (connector, shutdown)
}

/// Poll `condition` until it holds, panicking after a couple of seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// A future resolving when the returned sender fires or is dropped.
pub fn cancellation() -> (
    tokio::sync::oneshot::Sender<()>,
    impl Future<Output = ()> + Send + 'static,
) {
    let (sender, receiver) = tokio::sync::oneshot::channel::<()>();
    (sender, async move {
        let _ = receiver.await;
    })
}
