use anyhow::Result;
use tracing::{debug, error};

use crate::bus::topics;
use crate::domain::message::{ChatForward, ErrorFrame, InboundFrame};
use crate::server::VChatRelayServer;

/// 处理入站文本帧 / Handle an inbound text frame
///
/// 仅 type == "chat" 被处理；校验失败丢弃并尽力回发错误帧。网关角色走本地
/// 快速路径，边缘角色发即忘转发到聊天主题。
/// Only type == "chat" is handled; validation failures are dropped with a
/// best-effort error frame. The gateway role takes the local fast path, the
/// edge role fire-and-forgets onto the chat topic.
pub async fn dispatch_inbound(
    server: &VChatRelayServer,
    user_id: &str,
    text: &str,
) -> Result<()> {
    debug!("📨 Received text from {}: {}", user_id, text);
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            let _ = server.send_json_to_user(user_id, &ErrorFrame::new("invalid json"));
            return Ok(());
        }
    };
    if frame.frame_type != "chat" {
        debug!("ignoring frame type {:?} from {}", frame.frame_type, user_id);
        return Ok(());
    }

    let receiver_id = frame.receiver_id.unwrap_or_default();
    let content = frame.content.unwrap_or_default().trim().to_string();
    if receiver_id.is_empty() || content.is_empty() {
        let _ = server
            .send_json_to_user(user_id, &ErrorFrame::new("receiverId and content are required"));
        return Ok(());
    }

    if server.is_gateway() {
        server.deliver_local_chat(user_id, &receiver_id, &content).await?;
    } else {
        let forward = ChatForward {
            sender_id: user_id.to_string(),
            receiver_id,
            content,
            ts: chrono::Utc::now().timestamp_millis(),
        };
        let payload = serde_json::to_string(&forward)?;
        // 至多一次：发布失败只记录，不重试，连接不受影响
        // At-most-once: publish failures are logged, never retried, the
        // connection is unaffected
        if let Err(e) = server.bus.publish(topics::CHAT_FORWARD, payload).await {
            error!("bus unavailable, chat payload lost: {}", e);
        }
    }
    Ok(())
}
