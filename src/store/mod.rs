//! 共享会话存储 / Shared session store
//!
//! 保存 `user → 所属节点` 与 `user → 在线状态/最后在线时间`，所有进程可达。
//! 一致性契约是“最后写入获胜”的 upsert/delete/read，不提供 CAS；注册中心的
//! 注销围栏因此只是读-比较-删，不是线性一致的。
//! Holds `user → owning-node` and `user → presence/last-seen`, reachable by
//! every process. The consistency contract is last-write-wins
//! upsert/delete/read with no compare-and-swap; the registry's unregister
//! fence is therefore read-compare-delete, not linearizable.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::message::PresenceRecord;
use crate::error::RelayError;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// 键布局 / Key layout
pub fn session_key(user_id: &str) -> String {
    format!("session:{}", user_id)
}

pub fn presence_status_key(user_id: &str) -> String {
    format!("presence:{}:status", user_id)
}

pub fn presence_last_seen_key(user_id: &str) -> String {
    format!("presence:{}:lastSeen", user_id)
}

/// 会话与在线状态存储 / Session and presence store
///
/// 会话与在线条目携带TTL，由边缘节点的周期性重注册刷新；过期即隐式注销。
/// Session and online entries carry a TTL refreshed by the edge nodes'
/// periodic re-registration; expiry is an implicit unregister.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn put_session(
        &self,
        user_id: &str,
        server_id: &str,
        ttl: Duration,
    ) -> Result<(), RelayError>;

    async fn get_session(&self, user_id: &str) -> Result<Option<String>, RelayError>;

    async fn remove_session(&self, user_id: &str) -> Result<(), RelayError>;

    async fn set_presence_online(&self, user_id: &str, ttl: Duration) -> Result<(), RelayError>;

    /// 置为离线并写入最后在线时间 / Set offline and stamp last-seen
    async fn set_presence_offline(&self, user_id: &str) -> Result<(), RelayError>;

    /// 缺失键读作离线 / A missing key reads as offline
    async fn get_presence(&self, user_id: &str) -> Result<PresenceRecord, RelayError>;
}
