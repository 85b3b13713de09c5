//! 会话注册中心 / Session registry
//!
//! 用户→节点映射与在线状态的唯一写者，完全由消费的事件驱动：生命周期事件
//! 写存储，定位请求永远得到应答（未命中应答 null）。
//! The sole writer of the user→node mapping and presence, driven entirely by
//! consumed events: lifecycle events write the store, lookup requests are
//! always answered (misses answered with null).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bus::{topics, MessageBus};
use crate::domain::message::{
    LifecycleAction, LifecycleEvent, LookupRequest, LookupResponse, PresenceStatus,
};
use crate::error::RelayError;
use crate::service::presence::PresenceHook;
use crate::store::SessionStore;

/// 会话注册中心 / Session registry
pub struct SessionRegistry {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn SessionStore>,
    hook: Option<PresenceHook>,
    session_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        store: Arc<dyn SessionStore>,
        session_ttl: Duration,
    ) -> Self {
        Self { bus, store, hook: None, session_ttl }
    }

    /// 配置在线状态回调 / Configure the presence hook
    pub fn with_presence_hook(mut self, hook: PresenceHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// 订阅生命周期与定位主题并启动消费循环
    /// Subscribe to the lifecycle and lookup topics and start the consumer
    /// loop
    pub async fn start(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), RelayError> {
        let mut lifecycle_rx = self.bus.subscribe(topics::SESSION_LIFECYCLE).await?;
        let mut lookup_rx = self.bus.subscribe(topics::SESSION_LOOKUP_REQUEST).await?;

        tokio::spawn(async move {
            info!("🗂️ Session registry consuming lifecycle and lookup topics");
            loop {
                tokio::select! {
                    maybe = lifecycle_rx.recv() => {
                        match maybe {
                            Some(payload) => self.handle_lifecycle(&payload).await,
                            None => break,
                        }
                    }
                    maybe = lookup_rx.recv() => {
                        match maybe {
                            Some(payload) => self.handle_lookup(&payload).await,
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
            info!("session registry stopped");
        });
        Ok(())
    }

    async fn handle_lifecycle(&self, payload: &str) {
        let event: LifecycleEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("malformed lifecycle event dropped: {}", e);
                return;
            }
        };
        match event.action {
            LifecycleAction::Register => self.apply_register(&event).await,
            LifecycleAction::Unregister => self.apply_unregister(&event).await,
        }
    }

    async fn apply_register(&self, event: &LifecycleEvent) {
        // 心跳重注册也走这里；仅在真正的离线→在线迁移时触发回调
        // Heartbeat re-registration lands here too; the hook fires only on a
        // real offline→online transition
        let was_online = match self.store.get_presence(&event.user_id).await {
            Ok(record) => record.status == PresenceStatus::Online,
            Err(_) => false,
        };

        if let Err(e) = self
            .store
            .put_session(&event.user_id, &event.server_id, self.session_ttl)
            .await
        {
            error!("store unavailable, registration dropped: {}", e);
            return;
        }
        if let Err(e) = self.store.set_presence_online(&event.user_id, self.session_ttl).await {
            error!("store unavailable, presence write dropped: {}", e);
        }
        if was_online {
            debug!("🔄 Refreshed registration: user {} on {}", event.user_id, event.server_id);
        } else {
            info!("✅ User {} registered on server {}", event.user_id, event.server_id);
            if let Some(hook) = &self.hook {
                hook.notify(&event.user_id, PresenceStatus::Online);
            }
        }
    }

    async fn apply_unregister(&self, event: &LifecycleEvent) {
        // 注销围栏：只有事件的 serverId 仍与存储一致才删除，防止旧节点的
        // 迟到断开覆盖快速重连后的新注册
        // Unregister fence: delete only while the event's serverId still
        // matches the store, so a late disconnect from the old node cannot
        // clobber a fresh registration after a fast reconnect
        match self.store.get_session(&event.user_id).await {
            Ok(Some(current)) if current == event.server_id => {
                if let Err(e) = self.store.remove_session(&event.user_id).await {
                    error!("store unavailable, unregister dropped: {}", e);
                    return;
                }
                if let Err(e) = self.store.set_presence_offline(&event.user_id).await {
                    error!("store unavailable, presence write dropped: {}", e);
                }
                info!("❌ User {} unregistered from server {}", event.user_id, event.server_id);
                if let Some(hook) = &self.hook {
                    hook.notify(&event.user_id, PresenceStatus::Offline);
                }
            }
            Ok(Some(current)) => {
                info!(
                    "🛡️ Stale unregister ignored: user {} now on {} (event from {})",
                    event.user_id, current, event.server_id
                );
            }
            Ok(None) => {
                debug!("unregister for unknown session: user {}", event.user_id);
            }
            Err(e) => {
                error!("store unavailable, unregister dropped: {}", e);
            }
        }
    }

    async fn handle_lookup(&self, payload: &str) {
        let request: LookupRequest = match serde_json::from_str(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("malformed lookup request dropped: {}", e);
                return;
            }
        };
        debug!("🔍 Fetching owning node for user {}", request.user_id);

        // 存储不可用按未命中应答：查询永远有回音 / Store outages answer as a
        // miss: lookups always get a reply
        let server_id = match self.store.get_session(&request.user_id).await {
            Ok(server_id) => server_id,
            Err(e) => {
                error!("store unavailable for lookup, answering null: {}", e);
                None
            }
        };

        let response = LookupResponse {
            user_id: request.user_id.clone(),
            server_id: server_id.clone(),
            request_id: request.request_id,
        };
        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to encode lookup response: {}", e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(topics::SESSION_LOOKUP_RESPONSE, payload).await {
            error!("bus unavailable, lookup response lost: {}", e);
        } else {
            debug!(
                "Sent serverId ({}) for user {}",
                server_id.as_deref().unwrap_or("offline"),
                request.user_id
            );
        }
    }
}
