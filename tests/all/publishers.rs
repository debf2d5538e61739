use crate::helpers::{connected_connector, fast_connector_config, FakeBroker};
use fake::{faker::lorem::en::Sentence, Fake};
use rabbit_resilience::connector::{Connector, ConnectorConfig};
use rabbit_resilience::pool::{ChannelManager, ChannelPool};
use rabbit_resilience::publishers::{
    constant_delay, MessageEnvelope, Publisher, PublisherError, RetryPolicy,
};
use rabbit_resilience::PubSub;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn publisher(connector: Arc<Connector>, retry: RetryPolicy) -> Publisher {
    let channel_pool = ChannelPool::builder(ChannelManager::new(connector))
        .max_size(4)
        .build()
        .unwrap();
    Publisher::builder(channel_pool)
        .publish_timeout(Duration::from_secs(1))
        .retry_policy(retry)
        .build()
}

#[tokio::test]
async fn a_message_is_published_with_generated_properties() {
    // Arrange
    let broker = FakeBroker::new();
    let (connector, _dial) = connected_connector(&broker).await;
    let publisher = publisher(connector, RetryPolicy::default());
    let payload: String = Sentence(3..6).fake();

    // Act
    publisher
        .publish(MessageEnvelope::new("eventbus", "test", payload.clone()).with_priority(99))
        .await
        .unwrap();

    // Assert
    let published = broker.published();
    assert_eq!(published.len(), 1);
    let message = &published[0];
    assert_eq!(message.exchange, "eventbus");
    assert_eq!(message.routing_key, "test");
    assert_eq!(message.payload, payload.as_bytes());
    assert!(message.options.mandatory);
    assert!(!message.options.immediate);
    assert_eq!(*message.properties.priority(), Some(99));
    assert_eq!(*message.properties.delivery_mode(), Some(2));
    assert!(message.properties.message_id().is_some());
    assert!(message.properties.timestamp().is_some());
}

#[tokio::test]
async fn publishing_gives_up_after_exactly_the_maximum_attempts() {
    // Arrange
    let broker = FakeBroker::new();
    broker.fail_publishes(u32::MAX);
    let (connector, _dial) = connected_connector(&broker).await;
    let publisher = publisher(
        connector,
        RetryPolicy::new(4, constant_delay(Duration::from_millis(1))),
    );

    // Act
    let outcome = publisher
        .publish(MessageEnvelope::new("eventbus", "test", "ping"))
        .await;

    // Assert
    assert!(matches!(outcome, Err(PublisherError::GenericError(_))));
    assert_eq!(broker.publish_attempts(), 4);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn transient_publishing_failures_are_retried() {
    // Arrange
    let broker = FakeBroker::new();
    broker.fail_publishes(2);
    let (connector, _dial) = connected_connector(&broker).await;
    let publisher = publisher(
        connector,
        RetryPolicy::new(3, constant_delay(Duration::from_millis(1))),
    );

    // Act
    let outcome = publisher
        .publish(MessageEnvelope::new("eventbus", "test", "ping"))
        .await;

    // Assert
    assert!(outcome.is_ok());
    assert_eq!(broker.publish_attempts(), 3);
    assert_eq!(broker.published().len(), 1);
}

#[tokio::test]
async fn retried_messages_keep_the_same_message_id() {
    // Arrange
    let broker = FakeBroker::new();
    broker.fail_publishes(1);
    let (connector, _dial) = connected_connector(&broker).await;
    let publisher = publisher(
        connector,
        RetryPolicy::new(2, constant_delay(Duration::from_millis(1))),
    );

    // Act
    publisher
        .publish(MessageEnvelope::new("eventbus", "test", "ping").with_message_id("order-42".into()))
        .await
        .unwrap();

    // Assert
    let published = broker.published();
    assert_eq!(
        published[0]
            .properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str()),
        Some("order-42")
    );
}

#[tokio::test]
async fn publishing_fails_fast_while_disconnected() {
    // Arrange
    let broker = FakeBroker::new();
    let connector = Arc::new(Connector::new(broker.dialer(), fast_connector_config(5)));
    let publisher = publisher(
        connector,
        RetryPolicy::new(3, constant_delay(Duration::from_millis(1))),
    );
    let start = Instant::now();

    // Act
    let outcome = publisher
        .publish(MessageEnvelope::new("eventbus", "test", "ping"))
        .await;

    // Assert
    match outcome {
        Err(PublisherError::ChannelUnavailable(e)) => assert!(e.is_not_connected()),
        other => panic!("Unexpected outcome: {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(broker.publish_attempts(), 0);
}

#[tokio::test]
async fn pubsub_dials_in_the_background_and_publishes() {
    // Arrange
    let broker = FakeBroker::new();
    broker.fail_dials(2);
    let config = ConnectorConfig::default()
        .with_reconnect_wait(Duration::from_millis(1))
        .with_liveness_check_interval(Duration::from_millis(5));
    let (shutdown, on_shutdown) = tokio::sync::oneshot::channel::<()>();

    // Act
    let (pubsub, dial) = PubSub::start(broker.dialer(), config, async move {
        let _ = on_shutdown.await;
    })
    .unwrap();
    pubsub
        .connector()
        .wait_until_connected(std::future::pending())
        .await
        .unwrap();
    pubsub
        .publisher()
        .publish(MessageEnvelope::new("eventbus", "test", "ping"))
        .await
        .unwrap();

    // Assert
    assert_eq!(broker.dial_attempts(), 3);
    assert_eq!(broker.published().len(), 1);
    assert_eq!(pubsub.publisher().retry_policy().max_attempts(), 10);

    shutdown.send(()).unwrap();
    assert!(dial.await.unwrap().is_err());
}
