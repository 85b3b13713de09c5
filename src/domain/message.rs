use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 会话生命周期动作 / Session lifecycle action
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Register,
    Unregister,
}

/// 会话生命周期事件（session-lifecycle 主题）
/// Session lifecycle event (session-lifecycle topic)
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub action: LifecycleAction,
    pub user_id: String,
    pub server_id: String,
    #[serde(default)]
    pub ts: i64,
}

impl LifecycleEvent {
    pub fn register(user_id: &str, server_id: &str) -> Self {
        Self {
            action: LifecycleAction::Register,
            user_id: user_id.to_string(),
            server_id: server_id.to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn unregister(user_id: &str, server_id: &str) -> Self {
        Self {
            action: LifecycleAction::Unregister,
            user_id: user_id.to_string(),
            server_id: server_id.to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 定位请求（session-lookup-request 主题）
/// Lookup request (session-lookup-request topic)
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    pub user_id: String,
    pub request_id: String,
}

/// 定位响应（session-lookup-response 主题）；缓存未命中也会应答，serverId 为 null
/// Lookup response (session-lookup-response topic); cache misses are answered
/// with a null serverId, never suppressed
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub user_id: String,
    pub server_id: Option<String>,
    pub request_id: String,
}

/// 聊天转发负载（chat-forward 主题）
/// Chat forward payload (chat-forward topic)
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatForward {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(default)]
    pub ts: i64,
}

/// 节点定向投递信封（chat-deliver-<serverId> 主题）
/// Node-scoped delivery envelope (chat-deliver-<serverId> topic)
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliverEnvelope {
    pub user_id: String,
    pub frame: serde_json::Value,
}

/// 群组事件信封（group-events 主题）；serverId 为发起节点，用于跳过自身副本
/// Group event envelope (group-events topic); serverId is the origin node,
/// used to skip its own copy
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupEvent {
    pub group_id: String,
    pub server_id: String,
    pub frame: serde_json::Value,
}

/// 消息投递状态；唯一的迁移是 Pending → Delivered，永不回退
/// Message delivery status; the only transition is Pending → Delivered,
/// never reverted
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub enum MessageStatus {
    Pending,
    Delivered,
}

/// 持久化的聊天消息 / Persisted chat message
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<i64>,
}

/// 在线状态 / Presence status
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// 在线状态记录 / Presence record
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<String>,
}

/// 在线连接信息（运维接口）/ Online connection info (ops API)
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnlineConnectionInfo {
    pub user_id: String,
    pub addr: String,
    pub connected_at: i64,
}

/// 在线连接列表响应 / Online connections listing response
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnlineConnectionsResponse {
    pub connections: Vec<OnlineConnectionInfo>,
    pub total_count: usize,
}

/// 客户端入站帧；仅 type == "chat" 被处理
/// Inbound client frame; only type == "chat" is handled
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// 出站聊天帧 / Outbound chat frame
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
pub struct ChatFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub data: ChatMessage,
}

impl ChatFrame {
    pub fn new(data: ChatMessage) -> Self {
        Self { frame_type: "chat".to_string(), data }
    }
}

/// 出站错误帧（尽力通知，不保证送达）
/// Outbound error frame (best-effort notice, delivery not guaranteed)
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
pub struct ErrorFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub message: String,
}

impl ErrorFrame {
    pub fn new<T: Into<String>>(message: T) -> Self {
        Self { frame_type: "error".to_string(), message: message.into() }
    }
}

/// 出站在线状态帧 / Outbound presence frame
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PresenceFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub user_id: String,
    pub status: PresenceStatus,
}

impl PresenceFrame {
    pub fn new(user_id: &str, status: PresenceStatus) -> Self {
        Self { frame_type: "presence".to_string(), user_id: user_id.to_string(), status }
    }
}

/// 连接确认帧 / Connect acknowledgment frame
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
pub struct WelcomeFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub status: String,
    pub message: String,
}

impl WelcomeFrame {
    pub fn new<T: Into<String>>(message: T) -> Self {
        Self {
            frame_type: "welcome".to_string(),
            status: "connected".to_string(),
            message: message.into(),
        }
    }
}
