//! 消息总线抽象 / Message bus abstraction
//!
//! 有序、按主题寻址的发布/订阅传输；每个订阅者至多一次收到每条消息。
//! 发布失败不重试，只记录日志（接受消息丢失）。
//! Ordered, topic-addressed publish/subscribe transport; each subscriber
//! receives a message at most once. Publish failures are never retried, only
//! logged (message loss is accepted).
//!
//! 每用户事件顺序（注册/注销）只有在总线按 userId 分区时才有保证，这是部署
//! 契约，不是代码假设。此处的两个后端在单进程/单连接内保持每主题发布顺序。
//! Per-user event ordering (register/unregister) is only guaranteed when the
//! bus is partitioned by userId -- a deployment contract, not a code
//! assumption. Both backends here preserve per-topic publish order within a
//! single process / connection.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RelayError;

pub mod memory;
pub mod redis;

pub use memory::MemoryBus;
pub use redis::RedisBus;

/// 总线主题 / Bus topics
pub mod topics {
    pub const SESSION_LIFECYCLE: &str = "session-lifecycle";
    pub const SESSION_LOOKUP_REQUEST: &str = "session-lookup-request";
    pub const SESSION_LOOKUP_RESPONSE: &str = "session-lookup-response";
    pub const CHAT_FORWARD: &str = "chat-forward";
    pub const GROUP_EVENTS: &str = "group-events";

    /// 节点定向投递主题 / Node-scoped delivery topic
    pub fn chat_deliver(server_id: &str) -> String {
        format!("chat-deliver-{}", server_id)
    }
}

/// 消息总线 / Message bus
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// 发布一条JSON负载到主题 / Publish a JSON payload to a topic
    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError>;

    /// 订阅主题，返回按发布顺序排列的负载流
    /// Subscribe to a topic, returning payloads in publish order
    async fn subscribe(&self, topic: &str) -> Result<mpsc::UnboundedReceiver<String>, RelayError>;
}
