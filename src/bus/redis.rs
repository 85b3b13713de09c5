use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::MessageBus;
use crate::error::RelayError;

/// Redis Pub/Sub 总线后端 / Redis Pub/Sub bus backend
///
/// 发布共用一条多路复用连接；每个订阅占用一条专属 pubsub 连接，由后台任务
/// 泵入无界通道。
/// Publishing shares one multiplexed connection; each subscription holds a
/// dedicated pubsub connection pumped into an unbounded channel by a
/// background task.
pub struct RedisBus {
    client: redis::Client,
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let client = redis::Client::open(url).map_err(RelayError::bus)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(RelayError::bus)?;
        Ok(Self { client, conn: Arc::new(Mutex::new(conn)) })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError> {
        let mut conn = self.conn.lock().await;
        let _: i64 = redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async(&mut *conn)
            .await
            .map_err(RelayError::bus)?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<String>, RelayError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(RelayError::bus)?;
        pubsub.subscribe(topic).await.map_err(RelayError::bus)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let topic = topic.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("non-string payload on topic {}: {}", topic, e),
                }
            }
            debug!("pubsub stream for topic {} closed", topic);
        });
        Ok(rx)
    }
}
