use super::broker::{topic_matches, EventCallback, MessageBroker, MessageBrokerTrait};
use super::event::{EventMessage, EventType};
use anyhow::Result;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use uuid::Uuid;

fn forward_to(sender: mpsc::UnboundedSender<EventMessage>) -> EventCallback {
    Arc::new(move |event| {
        let sender = sender.clone();
        async move {
            sender.send(event)?;
            Ok(())
        }
        .boxed()
    })
}

#[test]
fn topic_patterns() {
    let camera = Uuid::new_v4();
    let key = format!("camera.status_changed.{}", camera);

    assert!(topic_matches("camera.status_changed.#", &key));
    assert!(topic_matches("camera.status_changed.#", "camera.status_changed"));
    assert!(topic_matches("camera.*.*", &key));
    assert!(topic_matches(&format!("#.{}", camera), &key));
    assert!(topic_matches("#", "system.startup"));
    assert!(!topic_matches("camera.*", &key));
    assert!(!topic_matches("incident.created.#", &key));
}

#[tokio::test]
async fn test_publish_subscribe() -> Result<()> {
    let broker = MessageBroker::default();
    let (tx, mut rx) = mpsc::unbounded_channel();

    broker.subscribe(EventType::IncidentCreated, forward_to(tx)).await?;

    broker
        .publish(EventType::SystemStartup, None, serde_json::json!({}))
        .await?;
    broker
        .publish(EventType::IncidentCreated, Some(Uuid::new_v4()), serde_json::json!({"test": true}))
        .await?;

    let event = timeout(Duration::from_secs(2), rx.recv()).await?.unwrap();
    assert_eq!(event.event_type, EventType::IncidentCreated);
    assert_eq!(event.payload["test"], true);
    assert!(rx.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn source_subscription_only_sees_that_source() -> Result<()> {
    let broker = MessageBroker::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let camera = Uuid::new_v4();

    broker.subscribe_source(camera, forward_to(tx)).await?;

    broker
        .publish(EventType::CameraStatusChanged, Some(Uuid::new_v4()), serde_json::json!({}))
        .await?;
    broker
        .publish(EventType::CameraStatusChanged, Some(camera), serde_json::json!({}))
        .await?;

    let event = timeout(Duration::from_secs(2), rx.recv()).await?.unwrap();
    assert_eq!(event.source_id, Some(camera));
    Ok(())
}

#[tokio::test]
async fn unsubscribe_removes_subscription() -> Result<()> {
    let broker = MessageBroker::default();
    let (tx, _rx) = mpsc::unbounded_channel();

    let id = broker.subscribe_pattern("#", forward_to(tx)).await?;
    assert_eq!(broker.subscription_count().await, 1);

    broker.unsubscribe(&id).await?;
    assert_eq!(broker.subscription_count().await, 0);
    assert!(broker.unsubscribe(&id).await.is_err());
    Ok(())
}

#[tokio::test]
async fn publishing_without_subscribers_is_not_an_error() -> Result<()> {
    let broker = MessageBroker::default();
    broker
        .publish(EventType::Custom("drill".into()), None, "payload")
        .await
}

#[tokio::test]
async fn lagging_subscriber_counts_dropped_events_and_keeps_consuming() -> Result<()> {
    let broker = MessageBroker::new(2);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));

    let callback_gate = gate.clone();
    let callback: EventCallback = Arc::new(move |event| {
        let sender = tx.clone();
        let gate = callback_gate.clone();
        async move {
            sender.send(event)?;
            gate.acquire().await?.forget();
            Ok(())
        }
        .boxed()
    });
    broker.subscribe(EventType::IncidentCreated, callback).await?;

    broker
        .publish(EventType::IncidentCreated, None, serde_json::json!({"n": 0}))
        .await?;
    // The consumer is now parked inside the callback
    timeout(Duration::from_secs(2), rx.recv()).await?.unwrap();

    for n in 1..=10 {
        broker
            .publish(EventType::IncidentCreated, None, serde_json::json!({"n": n}))
            .await?;
    }
    gate.add_permits(100);

    let mut last = 0;
    while last != 10 {
        let event = timeout(Duration::from_secs(2), rx.recv()).await?.unwrap();
        last = event.payload["n"].as_i64().unwrap();
    }
    assert!(broker.dropped_events() > 0);
    assert_eq!(MessageBroker::default().dropped_events(), 0);
    Ok(())
}
