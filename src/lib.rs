//! v-chat-relay 实时层 / v-chat-relay real-time layer
//!
//! 聊天平台的实时分发层：分布式会话注册、异步定位关联协议、
//! WebSocket 边缘节点与本地投递网关。
//! The real-time layer of the chat platform: distributed session registry,
//! async lookup correlation protocol, WebSocket edge nodes and the local
//! delivery gateway. CRUD services live outside this crate and are consumed
//! behind traits.

use tracing_subscriber::EnvFilter;

pub mod api;
pub mod bus;
pub mod config;
pub mod correlate;
pub mod domain;
pub mod error;
pub mod persist;
pub mod registry;
pub mod server;
pub mod service;
pub mod store;
pub mod tasks;
pub mod ws;

pub use error::RelayError;
pub use server::VChatRelayServer;

/// 初始化日志 / Initialize logging
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .ok();
}
