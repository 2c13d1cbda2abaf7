use crate::error::Error;
use crate::messaging::event::{EventMessage, EventType};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{debug, error, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Default number of events buffered per subscriber. Sized for incident bursts
/// from a single job poll, which the alert dispatcher must not miss.
pub const DEFAULT_CAPACITY: usize = 4096;

/// Callback function type for event handling
pub type EventCallback = Arc<dyn Fn(EventMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Message broker service trait
#[async_trait]
pub trait MessageBrokerTrait: Send + Sync {
    /// Publish an event
    async fn publish<T: Serialize + Send>(&self, event_type: EventType, source_id: Option<Uuid>, payload: T) -> Result<()>;

    /// Subscribe to an event type
    async fn subscribe(&self, event_type: EventType, callback: EventCallback) -> Result<String>;

    /// Subscribe to all events from a specific source
    async fn subscribe_source(&self, source_id: Uuid, callback: EventCallback) -> Result<String>;

    /// Subscribe to a topic pattern (`*` matches one word, `#` zero or more)
    async fn subscribe_pattern(&self, pattern: &str, callback: EventCallback) -> Result<String>;

    /// Unsubscribe from a subscription
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;
}

/// In-process topic broker on top of a broadcast channel
pub struct MessageBroker {
    sender: broadcast::Sender<EventMessage>,
    subscriptions: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    dropped: Arc<AtomicU64>,
}

impl MessageBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Events lost by lagging subscribers since the broker was created
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Start a consumer task for the given routing pattern and callback
    async fn start_consumer(&self, pattern: &str, callback: EventCallback) -> Result<String> {
        // Subscribe before spawning so nothing published after this call is missed
        let mut receiver = self.sender.subscribe();

        let subscription_id = Uuid::new_v4().to_string();
        let subscription_id_clone = subscription_id.clone();
        let pattern_owned = pattern.to_string();
        let dropped = self.dropped.clone();

        let handle = tokio::spawn(async move {
            info!("Started consumer for pattern: {} (subscription: {})", pattern_owned, subscription_id_clone);

            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if !topic_matches(&pattern_owned, &event.routing_key()) {
                            continue;
                        }
                        debug!("Received event: {} ({})", event.event_type, event.id);
                        if let Err(e) = callback(event).await {
                            error!("Error processing event: {}", e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        let total = dropped.fetch_add(skipped, Ordering::Relaxed) + skipped;
                        error!(
                            "Subscription {} for {} lagged: {} events dropped ({} in total)",
                            subscription_id_clone, pattern_owned, skipped, total
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            info!("Consumer stopped for pattern: {} (subscription: {})", pattern_owned, subscription_id_clone);
        });

        self.subscriptions.write().await.insert(subscription_id.clone(), handle);

        Ok(subscription_id)
    }

    /// Abort every consumer task
    pub async fn shutdown(&self) {
        let mut subscriptions = self.subscriptions.write().await;
        for (_, handle) in subscriptions.drain() {
            handle.abort();
        }
    }
}

impl Default for MessageBroker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl MessageBrokerTrait for MessageBroker {
    async fn publish<T: Serialize + Send>(&self, event_type: EventType, source_id: Option<Uuid>, payload: T) -> Result<()> {
        let event = EventMessage::new(event_type, source_id, payload)?;
        let routing_key = event.routing_key();
        let id = event.id;

        match self.sender.send(event) {
            Ok(receivers) => debug!("Published event: {} with routing key: {} to {} receivers", id, routing_key, receivers),
            Err(_) => debug!("No subscribers for event {} ({})", id, routing_key),
        }

        Ok(())
    }

    async fn subscribe(&self, event_type: EventType, callback: EventCallback) -> Result<String> {
        let pattern = format!("{}.#", event_type);
        self.start_consumer(&pattern, callback).await
    }

    async fn subscribe_source(&self, source_id: Uuid, callback: EventCallback) -> Result<String> {
        let pattern = format!("#.{}", source_id);
        self.start_consumer(&pattern, callback).await
    }

    async fn subscribe_pattern(&self, pattern: &str, callback: EventCallback) -> Result<String> {
        self.start_consumer(pattern, callback).await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;

        if let Some(handle) = subscriptions.remove(subscription_id) {
            handle.abort();
            info!("Unsubscribed: {}", subscription_id);
            Ok(())
        } else {
            Err(Error::NotFound(format!("Subscription not found: {}", subscription_id)).into())
        }
    }
}

/// AMQP-style topic matching over dot separated words
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match pattern.split_first() {
            None => key.is_empty(),
            Some((&"#", rest)) => (0..=key.len()).any(|skip| matches(rest, &key[skip..])),
            Some((&"*", rest)) => !key.is_empty() && matches(rest, &key[1..]),
            Some((word, rest)) => key.first() == Some(word) && matches(rest, &key[1..]),
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

/// Create a message broker service
pub fn create_message_broker() -> Arc<MessageBroker> {
    Arc::new(MessageBroker::default())
}
