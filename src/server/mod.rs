use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::error;

use crate::bus::{topics, MessageBus};
use crate::domain::message::{LifecycleEvent, OnlineConnectionInfo};
use crate::persist::{GroupDirectory, MessageRepository};

/// 客户端连接信息 / Client connection information
#[derive(Clone)]
pub struct Connection {
    pub user_id: String,                        // 用户ID / User ID
    pub addr: SocketAddr,                       // 客户端地址 / Client address
    pub sender: mpsc::UnboundedSender<Message>, // 消息发送器 / Message sender
    pub connected_at: i64,                      // 连接时间 / Connected-at millis
}

/// 网关上下文：消息持久化与群组读取，仅投递网关角色持有
/// Gateway context: message persistence and group reads, held only by the
/// delivery-gateway role
#[derive(Clone)]
pub struct GatewayContext {
    pub messages: Arc<dyn MessageRepository>,
    pub groups: Arc<dyn GroupDirectory>,
}

/// 节点全局状态 / Node global state
///
/// 一个结构贯穿边缘与网关两种角色：网关部分是可选的，未配置时节点是纯粹的
/// 无状态边缘。连接表只在本进程内可见。
/// One struct spans the edge and gateway roles: the gateway part is optional,
/// and without it the node is a pure stateless edge. The connection table is
/// process-local.
#[derive(Clone)]
pub struct VChatRelayServer {
    pub node_id: String,                              // 当前节点ID / Current node ID
    pub connections: Arc<DashMap<String, Connection>>, // 用户到连接映射 / User -> connection
    pub bus: Arc<dyn MessageBus>,                     // 消息总线 / Message bus
    pub gateway: Option<GatewayContext>,              // 网关上下文 / Gateway context
    pub started_at: i64,                              // 启动时间 / Started-at millis
}

impl VChatRelayServer {
    /// 构建边缘节点实例 / Build an edge node instance
    pub fn new(node_id: String, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            node_id,
            connections: Arc::new(DashMap::new()),
            bus,
            gateway: None,
            started_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 配置网关快速路径 / Configure the gateway fast path
    pub fn with_gateway(
        mut self,
        messages: Arc<dyn MessageRepository>,
        groups: Arc<dyn GroupDirectory>,
    ) -> Self {
        self.gateway = Some(GatewayContext { messages, groups });
        self
    }

    pub fn is_gateway(&self) -> bool {
        self.gateway.is_some()
    }

    /// 本节点当前连接的用户 / Users currently connected to this node
    pub fn local_user_ids(&self) -> Vec<String> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    /// 在线连接快照（运维接口用）/ Online connection snapshot (for the ops API)
    pub fn online_connections(&self) -> Vec<OnlineConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| OnlineConnectionInfo {
                user_id: entry.value().user_id.clone(),
                addr: entry.value().addr.to_string(),
                connected_at: entry.value().connected_at,
            })
            .collect()
    }

    /// 发布生命周期事件；发即忘，总线故障不影响连接
    /// Publish a lifecycle event; fire-and-forget, bus failures leave the
    /// connection untouched
    pub async fn publish_lifecycle(&self, event: LifecycleEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to encode lifecycle event: {}", e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(topics::SESSION_LIFECYCLE, payload).await {
            error!("bus unavailable, lifecycle event lost: {}", e);
        }
    }
}
