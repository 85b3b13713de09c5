use std::sync::Arc;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::bus::topics;
use crate::domain::message::GroupEvent;
use crate::error::RelayError;
use crate::server::VChatRelayServer;

impl VChatRelayServer {
    /// 群组扇出：先投递本节点的成员，再把事件发布到总线让其他网关投递各自的
    /// 本地成员（跨节点可达性的必要推广）
    /// Group fan-out: deliver to local members first, then publish the event
    /// so other gateways reach their own local members (the generalization
    /// multi-node deployments require)
    pub async fn notify_group_members(
        &self,
        group_id: &str,
        frame: serde_json::Value,
    ) -> Result<usize, RelayError> {
        let Some(gateway) = &self.gateway else {
            return Err(RelayError::Internal(anyhow::anyhow!(
                "group fan-out requires the gateway context"
            )));
        };
        let members = gateway.groups.list_members(group_id).await?;
        let payload = frame.to_string();

        let mut local_count = 0usize;
        for member in &members {
            if let Some(connection) = self.connections.get(member) {
                if connection.sender.send(Message::Text(payload.clone())).is_ok() {
                    local_count += 1;
                }
            }
        }
        info!("📣 Group {} notified: {} local members", group_id, local_count);

        let event = GroupEvent {
            group_id: group_id.to_string(),
            server_id: self.node_id.clone(),
            frame,
        };
        match serde_json::to_string(&event) {
            Ok(payload) => {
                if let Err(e) = self.bus.publish(topics::GROUP_EVENTS, payload).await {
                    error!("bus unavailable, cross-node group event lost: {}", e);
                }
            }
            Err(e) => warn!("failed to encode group event: {}", e),
        }
        Ok(local_count)
    }

    /// 群组事件消费者：投递其他节点发起的事件给本地成员，跳过自身副本
    /// Group event consumer: delivers events originated on other nodes to
    /// local members, skipping this node's own copy
    pub async fn spawn_group_events_consumer(
        self: Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), RelayError> {
        let mut rx = self.bus.subscribe(topics::GROUP_EVENTS).await?;
        let server = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(payload) => server.handle_group_event(&payload).await,
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
        });
        Ok(())
    }

    async fn handle_group_event(&self, payload: &str) {
        let event: GroupEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("malformed group event dropped: {}", e);
                return;
            }
        };
        // 本节点发起的事件已经本地投递过 / Events originated here were
        // already delivered locally
        if event.server_id == self.node_id {
            return;
        }
        let Some(gateway) = &self.gateway else {
            return;
        };
        let members = match gateway.groups.list_members(&event.group_id).await {
            Ok(members) => members,
            Err(e) => {
                error!("group membership read failed: {}", e);
                return;
            }
        };
        let payload = event.frame.to_string();
        let mut delivered = 0usize;
        for member in &members {
            if let Some(connection) = self.connections.get(member) {
                if connection.sender.send(Message::Text(payload.clone())).is_ok() {
                    delivered += 1;
                }
            }
        }
        debug!(
            "group {} event from {} delivered to {} local members",
            event.group_id, event.server_id, delivered
        );
    }
}
