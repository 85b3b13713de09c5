use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::info;

use crate::domain::message::LifecycleEvent;
use crate::server::VChatRelayServer;

/// 周期性重注册任务：为本节点的每个在线用户重发注册事件，刷新注册中心的
/// 会话TTL；节点崩溃后停止刷新，TTL过期即隐式注销。
/// Periodic re-registration task: republishes a register event for every
/// locally connected user, refreshing the registry-side session TTL; a
/// crashed node stops refreshing and TTL expiry becomes the implicit
/// unregister.
pub fn spawn_reregister_task(
    server: Arc<VChatRelayServer>,
    interval_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        // 小抖动错开各节点的刷新 / A small jitter staggers refreshes across nodes
        let jitter_ms: u64 = rand::thread_rng().gen_range(0..=500);
        let period = Duration::from_secs(interval_secs.max(1)) + Duration::from_millis(jitter_ms);
        info!("⏰ Session re-register interval set to {:?}", period);
        let mut tick = interval(period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for user_id in server.local_user_ids() {
                        server
                            .publish_lifecycle(LifecycleEvent::register(&user_id, &server.node_id))
                            .await;
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
}
