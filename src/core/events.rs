use crate::core::errors::ClientError;
use reqwest::Url;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;
pub const STREAM_CHANNEL_CAPACITY: usize = 1000;

/// Notifications raised while executing one-shot requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    QuotaExceeded { uri: Url },
    MessageResent { uri: Url },
    Timeout { uri: Url },
    SymbolNotFound { symbol: String },
    KeepAliveFailure { uri: Url },
    AccessTokenExpired,
}

/// Notifications raised by a streaming listener's background worker
#[derive(Debug, Clone)]
pub enum StreamEvent<R> {
    Record(R),
    /// The requested number of historical bars has been delivered
    BarsBackQuotaReached { bars: u32 },
    Timeout { uri: Url },
    /// The worker hit a non-timeout transport failure and gave up on the connection
    Failed(Arc<ClientError>),
}

/// Publishing side of a broadcast event channel.
///
/// Sending with no live subscribers is not an error; the event is dropped.
#[derive(Debug)]
pub struct EventBus<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: E) {
        let _ = self.sender.send(event);
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Fan-out of stream events to one bounded queue per subscriber.
///
/// Publishing waits for room in every live queue, so a slow subscriber slows
/// the stream instead of missing records. Queues whose receiver was dropped
/// are pruned on the next publish.
pub struct StreamSubscribers<E> {
    senders: Mutex<Vec<mpsc::Sender<E>>>,
}

impl<E: Clone + Send> StreamSubscribers<E> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<E> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        self.senders.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().iter().filter(|s| !s.is_closed()).count()
    }

    /// Queue `event` for every subscriber, waiting while any queue is full
    pub async fn publish(&self, event: E) {
        let senders = self.senders.lock().clone();
        let mut pruned = false;
        for sender in &senders {
            if sender.send(event.clone()).await.is_err() {
                pruned = true;
            }
        }
        if pruned {
            self.senders.lock().retain(|s| !s.is_closed());
        }
    }
}

impl<E: Clone + Send> Default for StreamSubscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for StreamSubscribers<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSubscribers")
            .field("queues", &self.senders.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_queue_holds_publisher_until_read() {
        let subscribers = Arc::new(StreamSubscribers::<u32>::new());
        let mut rx = subscribers.subscribe();

        let publisher = {
            let subscribers = Arc::clone(&subscribers);
            tokio::spawn(async move {
                for n in 0..(STREAM_CHANNEL_CAPACITY as u32 + 200) {
                    subscribers.publish(n).await;
                }
            })
        };

        let mut received = Vec::new();
        while let Some(n) = rx.recv().await {
            received.push(n);
            if received.len() == STREAM_CHANNEL_CAPACITY + 200 {
                break;
            }
        }
        publisher.await.unwrap();

        let expected: Vec<u32> = (0..(STREAM_CHANNEL_CAPACITY as u32 + 200)).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let subscribers = StreamSubscribers::<u32>::new();
        let mut kept = subscribers.subscribe();
        drop(subscribers.subscribe());
        assert_eq!(subscribers.subscriber_count(), 1);

        subscribers.publish(7).await;
        assert_eq!(kept.try_recv().unwrap(), 7);
        assert_eq!(subscribers.senders.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let subscribers = StreamSubscribers::<u32>::new();
        subscribers.publish(1).await;
        let mut late = subscribers.subscribe();
        assert!(late.try_recv().is_err());
    }
}
