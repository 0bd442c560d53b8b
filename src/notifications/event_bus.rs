//! Event bus broadcasting notices to presentation-layer subscribers
//!
//! Tokio broadcast channel underneath; publishing never blocks and does not
//! care whether anybody listens.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::events::{Notice, NoticeEvent};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NoticeEvent>,
    subscriber_count: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriber_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, serial: &str, notice: Notice) {
        let event = NoticeEvent::new(serial, notice);
        match self.sender.send(event) {
            Ok(count) => debug!(serial, subscribers = count, "notice published"),
            // No subscribers is the normal case when no UI is attached
            Err(_) => debug!(serial, "notice published (no subscribers)"),
        }
    }

    pub fn subscribe(&self) -> NoticeSubscriber {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst);
        NoticeSubscriber {
            receiver: self.sender.subscribe(),
            subscriber_count: self.subscriber_count.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct NoticeSubscriber {
    receiver: broadcast::Receiver<NoticeEvent>,
    subscriber_count: Arc<AtomicUsize>,
}

impl NoticeSubscriber {
    /// Next event, or `None` once the bus is gone. Skips over lagged gaps.
    pub async fn recv(&mut self) -> Option<NoticeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "notice subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for NoticeSubscriber {
    fn drop(&mut self) {
        self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_reaches_subscriber_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish("CP001", Notice::message("first"));
        bus.publish("CP001", Notice::success("second"));

        let first = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_millis(100), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.notice.kind(), "message");
        assert_eq!(second.notice.kind(), "success");
        assert_eq!(first.serial, "CP001");
    }

    #[test]
    fn subscriber_count_tracks_lifecycle() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
