use std::sync::Arc;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::bus::topics;
use crate::domain::message::{ChatFrame, ChatMessage, DeliverEnvelope, MessageStatus};
use crate::error::RelayError;
use crate::server::VChatRelayServer;

impl VChatRelayServer {
    /// 网关快速路径：接收者在本节点则直接投递并落库为 Delivered，否则落库为
    /// Pending（无再投递触发，接收者重连后自行拉取历史）
    /// Gateway fast path: deliver directly and persist as Delivered when the
    /// receiver is local, otherwise persist as Pending (no re-delivery
    /// trigger; the receiver fetches history on reconnect)
    pub async fn deliver_local_chat(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<ChatMessage, RelayError> {
        let Some(gateway) = &self.gateway else {
            return Err(RelayError::Internal(anyhow::anyhow!(
                "local delivery requires the gateway context"
            )));
        };

        let receiver_online = self.connections.contains_key(receiver_id);
        let status = if receiver_online {
            MessageStatus::Delivered
        } else {
            MessageStatus::Pending
        };
        let message = gateway
            .messages
            .create_message(sender_id, receiver_id, content, status)
            .await?;

        let frame = ChatFrame::new(message.clone());
        // 回执发送者；接收者在线则同时推送副本 / Ack the sender; push a copy
        // to the receiver when online
        if let Err(e) = self.send_json_to_user(sender_id, &frame) {
            warn!("sender {} ack failed: {}", sender_id, e);
        }
        if receiver_online {
            if let Err(e) = self.send_json_to_user(receiver_id, &frame) {
                warn!("receiver {} push failed: {}", receiver_id, e);
            }
            info!("💬 Delivered message {} from {} to {}", message.id, sender_id, receiver_id);
        } else {
            info!("📥 Stored pending message {} from {} to {}", message.id, sender_id, receiver_id);
        }
        Ok(message)
    }

    /// 节点定向投递消费者：其他服务定位到本节点后，经此主题把帧推给本地用户
    /// Node-scoped delivery consumer: once another service locates this node,
    /// frames arrive on this topic for local push
    pub async fn spawn_node_delivery_consumer(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), RelayError> {
        let topic = topics::chat_deliver(&self.node_id);
        let mut rx = self.bus.subscribe(&topic).await?;
        let server = self;
        tokio::spawn(async move {
            info!("📦 Node delivery consumer listening on {}", topic);
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(payload) => server.handle_delivery(&payload),
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
        });
        Ok(())
    }

    fn handle_delivery(&self, payload: &str) {
        let envelope: DeliverEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("malformed delivery envelope dropped: {}", e);
                return;
            }
        };
        // 至多一次：目标用户已不在本节点则丢弃 / At-most-once: dropped when
        // the user is no longer local
        if self
            .send_frame_to_user(&envelope.user_id, Message::Text(envelope.frame.to_string()))
            .is_err()
        {
            debug!("user {} no longer local, delivery frame dropped", envelope.user_id);
        }
    }
}
