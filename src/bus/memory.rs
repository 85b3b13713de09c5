use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;

use super::MessageBus;
use crate::error::RelayError;

/// 进程内总线，用于测试与单进程部署
/// In-process bus for tests and single-process deployments
#[derive(Default)]
pub struct MemoryBus {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError> {
        let mut subscribers = self.subscribers.write();
        if let Some(senders) = subscribers.get_mut(topic) {
            // 顺带清理已断开的订阅者 / Drop disconnected subscribers on the way
            senders.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<String>, RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_subscriber_in_order() {
        let bus = MemoryBus::new();
        let mut rx_a = bus.subscribe("t").await.unwrap();
        let mut rx_b = bus.subscribe("t").await.unwrap();

        bus.publish("t", "one".to_string()).await.unwrap();
        bus.publish("t", "two".to_string()).await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap(), "one");
        assert_eq!(rx_a.recv().await.unwrap(), "two");
        assert_eq!(rx_b.recv().await.unwrap(), "one");
        assert_eq!(rx_b.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_lost() {
        let bus = MemoryBus::new();
        bus.publish("t", "gone".to_string()).await.unwrap();
        let mut rx = bus.subscribe("t").await.unwrap();
        bus.publish("t", "seen".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "seen");
    }
}
