//! 外部协作方接口 / External collaborator interfaces
//!
//! 消息持久化与群组成员读取属于外部CRUD服务；此处以trait消费，
//! 内存实现用于测试与单进程演示。
//! Message persistence and group-membership reads belong to the external CRUD
//! services; this layer consumes them behind traits, with in-memory
//! implementations for tests and single-process demos.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::message::{ChatMessage, MessageStatus};
use crate::error::RelayError;

/// 消息持久化接口 / Message persistence interface
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 以给定状态创建消息行；Delivered 同时盖上投递时间戳
    /// Create a message row with the given status; Delivered also stamps the
    /// delivery timestamp
    async fn create_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        status: MessageStatus,
    ) -> Result<ChatMessage, RelayError>;

    /// Pending → Delivered，单调：对已投递的行是无操作，永不回退
    /// Pending → Delivered, monotonic: a no-op on delivered rows, never
    /// reverted
    async fn mark_delivered(&self, message_id: &str) -> Result<(), RelayError>;
}

/// 群组成员读取接口（仅用于扇出目标选择）
/// Group membership read interface (fan-out targeting only)
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn list_members(&self, group_id: &str) -> Result<Vec<String>, RelayError>;
}

/// 内存消息仓库 / In-memory message repository
#[derive(Default)]
pub struct MemoryMessageRepository {
    messages: DashMap<String, ChatMessage>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, message_id: &str) -> Option<ChatMessage> {
        self.messages.get(message_id).map(|m| m.clone())
    }

    pub fn all(&self) -> Vec<ChatMessage> {
        self.messages.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn create_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        status: MessageStatus,
    ) -> Result<ChatMessage, RelayError> {
        let now = chrono::Utc::now().timestamp_millis();
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            status,
            created_at: now,
            delivered_at: (status == MessageStatus::Delivered).then_some(now),
        };
        self.messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn mark_delivered(&self, message_id: &str) -> Result<(), RelayError> {
        if let Some(mut entry) = self.messages.get_mut(message_id) {
            if entry.status == MessageStatus::Pending {
                entry.status = MessageStatus::Delivered;
                entry.delivered_at = Some(chrono::Utc::now().timestamp_millis());
            }
        }
        Ok(())
    }
}

/// 内存群组目录 / In-memory group directory
#[derive(Default)]
pub struct MemoryGroupDirectory {
    members: DashMap<String, Vec<String>>,
}

impl MemoryGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, group_id: &str, user_id: &str) {
        self.members
            .entry(group_id.to_string())
            .or_default()
            .push(user_id.to_string());
    }
}

#[async_trait]
impl GroupDirectory for MemoryGroupDirectory {
    async fn list_members(&self, group_id: &str) -> Result<Vec<String>, RelayError> {
        Ok(self.members.get(group_id).map(|m| m.clone()).unwrap_or_default())
    }
}
