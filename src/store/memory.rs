use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::SessionStore;
use crate::domain::message::{PresenceRecord, PresenceStatus};
use crate::error::RelayError;

/// 进程内存储，用于测试与单进程部署
/// In-process store for tests and single-process deployments
#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<String, (String, Instant)>,
    presence: DashMap<String, (PresenceStatus, Option<Instant>)>,
    last_seen: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put_session(
        &self,
        user_id: &str,
        server_id: &str,
        ttl: Duration,
    ) -> Result<(), RelayError> {
        self.sessions
            .insert(user_id.to_string(), (server_id.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn get_session(&self, user_id: &str) -> Result<Option<String>, RelayError> {
        let expired = match self.sessions.get(user_id) {
            Some(entry) => {
                let (server_id, deadline) = entry.value();
                if Instant::now() < *deadline {
                    return Ok(Some(server_id.clone()));
                }
                true
            }
            None => false,
        };
        if expired {
            // TTL过期即隐式注销 / TTL expiry is an implicit unregister
            self.sessions.remove(user_id);
        }
        Ok(None)
    }

    async fn remove_session(&self, user_id: &str) -> Result<(), RelayError> {
        self.sessions.remove(user_id);
        Ok(())
    }

    async fn set_presence_online(&self, user_id: &str, ttl: Duration) -> Result<(), RelayError> {
        self.presence
            .insert(user_id.to_string(), (PresenceStatus::Online, Some(Instant::now() + ttl)));
        Ok(())
    }

    async fn set_presence_offline(&self, user_id: &str) -> Result<(), RelayError> {
        self.presence.insert(user_id.to_string(), (PresenceStatus::Offline, None));
        self.last_seen.insert(user_id.to_string(), chrono::Utc::now().to_rfc3339());
        Ok(())
    }

    async fn get_presence(&self, user_id: &str) -> Result<PresenceRecord, RelayError> {
        let status = match self.presence.get(user_id) {
            Some(entry) => match entry.value() {
                (PresenceStatus::Online, Some(deadline)) if Instant::now() >= *deadline => {
                    PresenceStatus::Offline
                }
                (status, _) => *status,
            },
            None => PresenceStatus::Offline,
        };
        Ok(PresenceRecord {
            user_id: user_id.to_string(),
            status,
            last_seen_at: self.last_seen.get(user_id).map(|v| v.clone()),
        })
    }
}
