use anyhow::Result;
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::domain::message::{PresenceFrame, PresenceStatus};
use crate::server::VChatRelayServer;

/// 向指定用户发送消息 / Send a message to a specific user
impl VChatRelayServer {
    pub fn send_frame_to_user(&self, user_id: &str, message: Message) -> Result<()> {
        if let Some(connection) = self.connections.get(user_id) {
            connection
                .sender
                .send(message)
                .map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;
            debug!("📤 Sent frame to user {}", user_id);
            Ok(())
        } else {
            warn!("⚠️  User {} not connected here, frame dropped", user_id);
            Err(anyhow::anyhow!("User {} not connected on this node", user_id))
        }
    }

    pub fn send_json_to_user<T: Serialize>(&self, user_id: &str, frame: &T) -> Result<()> {
        let payload = serde_json::to_string(frame)?;
        self.send_frame_to_user(user_id, Message::Text(payload))
    }

    /// 广播文本帧到本节点全部连接；顺带清理已断开的连接
    /// Broadcast a text frame to every local connection; drops dead
    /// connections on the way
    pub fn broadcast_text(&self, payload: String) {
        let mut disconnected = Vec::new();
        for entry in self.connections.iter() {
            if entry.value().sender.send(Message::Text(payload.clone())).is_err() {
                disconnected.push(entry.key().clone());
            }
        }
        for user_id in disconnected {
            self.connections.remove(&user_id);
        }
    }

    /// 向本节点所有连接广播上下线通知（网关角色，O(n) 每事件）
    /// Broadcast a presence change to all local connections (gateway role,
    /// O(n) per event)
    pub fn broadcast_presence(&self, user_id: &str, status: PresenceStatus) {
        let frame = PresenceFrame::new(user_id, status);
        match serde_json::to_string(&frame) {
            Ok(payload) => self.broadcast_text(payload),
            Err(e) => warn!("failed to encode presence frame: {}", e),
        }
    }
}
