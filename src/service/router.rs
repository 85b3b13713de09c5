use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bus::{topics, MessageBus};
use crate::correlate::CorrelationClient;
use crate::domain::message::{ChatFrame, ChatForward, DeliverEnvelope, MessageStatus};
use crate::error::RelayError;
use crate::persist::MessageRepository;

/// 聊天路由器 / Chat router
///
/// 聊天主题的持久化/路由消费者：先落库为 Pending，定位接收者所在节点后把
/// 投递帧发布到该节点的定向主题，发布成功即把行升级为 Delivered（至多一次，
/// 发布即投递尝试，没有回执可等）。定位失败或超时则保持 Pending。
/// The persistence/routing consumer on the chat topic: persists as Pending
/// first, locates the receiver's node, publishes a delivery frame to that
/// node's scoped topic, and upgrades the row to Delivered on publish success
/// (at-most-once: the publish is the delivery attempt, there is no ack to
/// await). Locate misses and timeouts leave the row Pending.
pub struct ChatRouter {
    bus: Arc<dyn MessageBus>,
    correlator: Arc<CorrelationClient>,
    messages: Arc<dyn MessageRepository>,
}

impl ChatRouter {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        correlator: Arc<CorrelationClient>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        Self { bus, correlator, messages }
    }

    pub async fn start(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), RelayError> {
        let mut rx = self.bus.subscribe(topics::CHAT_FORWARD).await?;
        tokio::spawn(async move {
            info!("🚚 Chat router consuming {}", topics::CHAT_FORWARD);
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(payload) => self.handle_forward(&payload).await,
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
            info!("chat router stopped");
        });
        Ok(())
    }

    async fn handle_forward(&self, payload: &str) {
        let forward: ChatForward = match serde_json::from_str(payload) {
            Ok(forward) => forward,
            Err(e) => {
                warn!("malformed chat payload dropped: {}", e);
                return;
            }
        };

        let message = match self
            .messages
            .create_message(
                &forward.sender_id,
                &forward.receiver_id,
                &forward.content,
                MessageStatus::Pending,
            )
            .await
        {
            Ok(message) => message,
            Err(e) => {
                error!("persistence failed, chat payload lost: {}", e);
                return;
            }
        };

        match self.correlator.locate(&forward.receiver_id).await {
            Ok(Some(server_id)) => {
                let envelope = DeliverEnvelope {
                    user_id: forward.receiver_id.clone(),
                    frame: match serde_json::to_value(ChatFrame::new(message.clone())) {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!("failed to encode delivery frame: {}", e);
                            return;
                        }
                    },
                };
                let payload = match serde_json::to_string(&envelope) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("failed to encode delivery envelope: {}", e);
                        return;
                    }
                };
                match self.bus.publish(&topics::chat_deliver(&server_id), payload).await {
                    Ok(()) => {
                        if let Err(e) = self.messages.mark_delivered(&message.id).await {
                            error!("mark-delivered failed for {}: {}", message.id, e);
                        }
                        info!("📬 Routed message {} to node {}", message.id, server_id);
                    }
                    Err(e) => {
                        // 行保持 Pending / The row stays Pending
                        error!("bus unavailable, delivery frame lost: {}", e);
                    }
                }
            }
            Ok(None) => {
                debug!("receiver {} offline, message {} stored pending", forward.receiver_id, message.id);
            }
            Err(RelayError::LookupTimedOut { user_id }) => {
                warn!("⏱ Locate timed out for {}, message {} stored pending", user_id, message.id);
            }
            Err(e) => {
                error!("locate failed for {}: {}", forward.receiver_id, e);
            }
        }
    }
}
