//! 定位关联客户端 / Lookup correlation client
//!
//! 把同步的“定位用户”调用桥接到异步总线上：请求携带全局唯一 requestId，
//! 响应按 requestId 关联回挂起表中的 oneshot。
//! Bridges a synchronous "locate user" call onto the asynchronous bus: the
//! request carries a globally unique requestId, and responses are correlated
//! back to the oneshot in the pending table.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::{topics, MessageBus};
use crate::domain::message::{LookupRequest, LookupResponse};
use crate::error::RelayError;

/// 关联客户端 / Correlation client
///
/// 挂起表条目在匹配响应或截止期到达时移除，二者必居其一；不合并并发的
/// 同用户查询。
/// Pending entries are removed on the matching response or on deadline
/// expiry, whichever comes first; concurrent same-user lookups are never
/// coalesced.
pub struct CorrelationClient {
    bus: Arc<dyn MessageBus>,
    pending: DashMap<String, oneshot::Sender<Option<String>>>,
    timeout: Duration,
}

impl CorrelationClient {
    pub fn new(bus: Arc<dyn MessageBus>, timeout: Duration) -> Self {
        Self { bus, pending: DashMap::new(), timeout }
    }

    /// 订阅响应主题并启动消费任务；必须在首次 locate 之前调用
    /// Subscribe to the response topic and start the consumer task; must run
    /// before the first locate call
    pub async fn start(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), RelayError> {
        let mut rx = self.bus.subscribe(topics::SESSION_LOOKUP_RESPONSE).await?;
        let client = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(payload) => client.handle_response(&payload),
                            None => break,
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("lookup response consumer stopped");
        });
        Ok(())
    }

    /// 定位用户所在节点 / Locate the node owning a user's connection
    ///
    /// Ok(Some(serverId)) 命中；Ok(None) 未注册；Err(LookupTimedOut) 截止期内
    /// 无响应。超时后挂起条目一定已被移除，晚到的响应会被丢弃。
    /// Ok(Some(serverId)) on a hit; Ok(None) when unregistered;
    /// Err(LookupTimedOut) when no response arrives within the deadline. The
    /// pending entry is always gone after a timeout; late responses are
    /// discarded.
    pub async fn locate(&self, user_id: &str) -> Result<Option<String>, RelayError> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let request =
            LookupRequest { user_id: user_id.to_string(), request_id: request_id.clone() };
        let payload = serde_json::to_string(&request)
            .map_err(|e| RelayError::malformed(e.to_string()))?;
        debug!("📤 Requesting owning node for user {}", user_id);
        if let Err(e) = self.bus.publish(topics::SESSION_LOOKUP_REQUEST, payload).await {
            self.pending.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(server_id)) => Ok(server_id),
            Ok(Err(_)) | Err(_) => {
                self.pending.remove(&request_id);
                Err(RelayError::LookupTimedOut { user_id: user_id.to_string() })
            }
        }
    }

    /// 挂起表大小（测试用）/ Pending table size (for tests)
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn handle_response(&self, payload: &str) {
        match serde_json::from_str::<LookupResponse>(payload) {
            Ok(response) => {
                if let Some((_, tx)) = self.pending.remove(&response.request_id) {
                    debug!(
                        "📩 Lookup resolved: user {} at {:?}",
                        response.user_id, response.server_id
                    );
                    let _ = tx.send(response.server_id);
                } else {
                    debug!("late lookup response discarded: requestId={}", response.request_id);
                }
            }
            Err(e) => warn!("malformed lookup response dropped: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;

    #[tokio::test]
    async fn timeout_removes_pending_entry() {
        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        let client = Arc::new(CorrelationClient::new(bus, Duration::from_millis(20)));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::clone(&client).start(shutdown_rx).await.unwrap();

        let result = client.locate("nobody").await;
        assert!(matches!(result, Err(RelayError::LookupTimedOut { .. })));
        assert_eq!(client.pending_len(), 0);
    }

    #[tokio::test]
    async fn late_response_is_discarded() {
        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
        let client = Arc::new(CorrelationClient::new(Arc::clone(&bus), Duration::from_millis(20)));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::clone(&client).start(shutdown_rx).await.unwrap();

        let result = client.locate("u1").await;
        assert!(result.is_err());

        // 截止期之后才应答：没有匹配条目，直接丢弃
        // Answer after the deadline: no matching entry, discarded
        let response = LookupResponse {
            user_id: "u1".to_string(),
            server_id: Some("node-a".to_string()),
            request_id: "stale".to_string(),
        };
        bus.publish(topics::SESSION_LOOKUP_RESPONSE, serde_json::to_string(&response).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(client.pending_len(), 0);
    }
}
