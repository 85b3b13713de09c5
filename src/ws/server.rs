use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::server::VChatRelayServer;

/// 启动WS监听 / Start WS listener
impl VChatRelayServer {
    pub async fn run(self: Arc<Self>, host: String, port: u16) -> Result<()> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("🚀 v-chat-relay WebSocket server starting on {}", addr);
        info!("📡 Waiting for connections...");
        self.run_with_listener(listener).await
    }

    /// 在已绑定的监听器上运行（测试可用临时端口）
    /// Run on an already-bound listener (tests can use an ephemeral port)
    pub async fn run_with_listener(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        while let Ok((stream, peer_addr)) = listener.accept().await {
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) =
                    crate::ws::connection::handle_connection(stream, peer_addr, server).await
                {
                    tracing::error!("Connection error from {}: {}", peer_addr, e);
                }
            });
        }
        Ok(())
    }
}
