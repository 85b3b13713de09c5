use anyhow::Result;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::PresenceHookConfig;
use crate::domain::message::PresenceStatus;

/// 在线状态HTTP回调 / Presence-update HTTP callback
///
/// 通知外部CRUD服务用户上下线；失败只记录日志，不重试。
/// Notifies the external CRUD service of online/offline transitions;
/// failures are logged, never retried.
pub struct PresenceHook {
    config: PresenceHookConfig,
}

impl PresenceHook {
    pub fn new(config: PresenceHookConfig) -> Self {
        Self { config }
    }

    /// 触发回调（派生任务，不阻塞调用方）
    /// Fire the callback (spawned, never blocks the caller)
    pub fn notify(&self, user_id: &str, status: PresenceStatus) {
        if !self.config.enabled {
            return;
        }
        let Some(base_url) = self.config.base_url.clone() else {
            debug!("presence hook enabled but base_url missing, skipping");
            return;
        };
        let config = self.config.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = deliver(&config, &base_url, &user_id, status).await {
                error!("❌ Presence hook failed for {}: {}", user_id, e);
            }
        });
    }
}

async fn deliver(
    config: &PresenceHookConfig,
    base_url: &str,
    user_id: &str,
    status: PresenceStatus,
) -> Result<()> {
    let path = match status {
        PresenceStatus::Online => "setPresenceOnline",
        PresenceStatus::Offline => "setPresenceOffline",
    };
    let url = format!("{}/{}", base_url.trim_end_matches('/'), path);
    let body = serde_json::json!({ "userId": user_id });

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

    let mut request = client.post(&url).json(&body);
    if let Some(secret) = &config.secret {
        request = request.header("X-VChatRelay-Signature", sign(&body.to_string(), secret));
    }

    let response = request
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Presence hook request failed: {}", e))?;
    if response.status().is_success() {
        info!("✅ Presence hook delivered: {} {}", user_id, status);
        Ok(())
    } else {
        Err(anyhow::anyhow!("presence hook returned status {}", response.status()))
    }
}

/// 生成回调签名 / Generate hook signature
pub fn sign(payload: &str, secret: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_per_payload_and_secret() {
        let a = sign(r#"{"userId":"u1"}"#, "s1");
        let b = sign(r#"{"userId":"u1"}"#, "s1");
        let c = sign(r#"{"userId":"u2"}"#, "s1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("sha256="));
    }
}
