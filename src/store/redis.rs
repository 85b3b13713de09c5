use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{presence_last_seen_key, presence_status_key, session_key, SessionStore};
use crate::domain::message::{PresenceRecord, PresenceStatus};
use crate::error::RelayError;

/// Redis 会话存储后端 / Redis session store backend
///
/// SETEX 承担TTL；在线状态键携带与会话相同的TTL，节点崩溃后自然衰减为离线。
/// SETEX carries the TTL; the online status key shares the session TTL so a
/// crashed node's users decay to offline.
pub struct RedisStore {
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let client = redis::Client::open(url).map_err(RelayError::store)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(RelayError::store)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn put_session(
        &self,
        user_id: &str,
        server_id: &str,
        ttl: Duration,
    ) -> Result<(), RelayError> {
        let mut conn = self.conn.lock().await;
        let _: () = redis::cmd("SETEX")
            .arg(session_key(user_id))
            .arg(ttl.as_secs().max(1))
            .arg(server_id)
            .query_async(&mut *conn)
            .await
            .map_err(RelayError::store)?;
        Ok(())
    }

    async fn get_session(&self, user_id: &str) -> Result<Option<String>, RelayError> {
        let mut conn = self.conn.lock().await;
        let server_id: Option<String> = redis::cmd("GET")
            .arg(session_key(user_id))
            .query_async(&mut *conn)
            .await
            .map_err(RelayError::store)?;
        Ok(server_id)
    }

    async fn remove_session(&self, user_id: &str) -> Result<(), RelayError> {
        let mut conn = self.conn.lock().await;
        let _: i64 = redis::cmd("DEL")
            .arg(session_key(user_id))
            .query_async(&mut *conn)
            .await
            .map_err(RelayError::store)?;
        Ok(())
    }

    async fn set_presence_online(&self, user_id: &str, ttl: Duration) -> Result<(), RelayError> {
        let mut conn = self.conn.lock().await;
        let _: () = redis::cmd("SETEX")
            .arg(presence_status_key(user_id))
            .arg(ttl.as_secs().max(1))
            .arg("online")
            .query_async(&mut *conn)
            .await
            .map_err(RelayError::store)?;
        Ok(())
    }

    async fn set_presence_offline(&self, user_id: &str) -> Result<(), RelayError> {
        let mut conn = self.conn.lock().await;
        let _: () = redis::cmd("SET")
            .arg(presence_status_key(user_id))
            .arg("offline")
            .query_async(&mut *conn)
            .await
            .map_err(RelayError::store)?;
        let _: () = redis::cmd("SET")
            .arg(presence_last_seen_key(user_id))
            .arg(chrono::Utc::now().to_rfc3339())
            .query_async(&mut *conn)
            .await
            .map_err(RelayError::store)?;
        Ok(())
    }

    async fn get_presence(&self, user_id: &str) -> Result<PresenceRecord, RelayError> {
        let mut conn = self.conn.lock().await;
        let status: Option<String> = redis::cmd("GET")
            .arg(presence_status_key(user_id))
            .query_async(&mut *conn)
            .await
            .map_err(RelayError::store)?;
        let last_seen_at: Option<String> = redis::cmd("GET")
            .arg(presence_last_seen_key(user_id))
            .query_async(&mut *conn)
            .await
            .map_err(RelayError::store)?;

        let status = match status.as_deref() {
            Some("online") => PresenceStatus::Online,
            _ => PresenceStatus::Offline,
        };
        Ok(PresenceRecord { user_id: user_id.to_string(), status, last_seen_at })
    }
}
