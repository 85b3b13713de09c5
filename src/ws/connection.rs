use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::domain::message::{LifecycleEvent, PresenceStatus, WelcomeFrame};
use crate::server::{Connection, VChatRelayServer};

/// 处理新连接 / Handle new connection
///
/// 握手URL携带 `?userId=`；缺失则以 4001 关闭。成功后本地登记连接（覆盖同
/// 用户的旧条目）并发布注册事件，断开时反向清理并发布注销事件。
/// The handshake URL carries `?userId=`; missing it closes with 4001. On
/// success the connection is recorded locally (overwriting any prior entry
/// for the user) and a register event is published; disconnect reverses both.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    server: Arc<VChatRelayServer>,
) -> Result<()> {
    info!("📨 New connection from: {}", peer_addr);

    let mut user_id: Option<String> = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        user_id = req.uri().query().and_then(parse_user_id);
        Ok(resp)
    })
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let Some(user_id) = user_id else {
        warn!("Missing userId in WebSocket handshake from {}", peer_addr);
        let _ = ws_sender
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Library(4001),
                reason: "Missing userId".into(),
            })))
            .await;
        let _ = ws_sender.close().await;
        return Ok(());
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let writer_user = user_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                error!("Failed to send message to {}: {}", writer_user, e);
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    let connection = Connection {
        user_id: user_id.clone(),
        addr: peer_addr,
        sender: tx.clone(),
        connected_at: chrono::Utc::now().timestamp_millis(),
    };
    if server.connections.insert(user_id.clone(), connection).is_some() {
        info!("🔁 Replaced existing connection for user {}", user_id);
    }
    info!("✅ User {} connected from {}", user_id, peer_addr);

    // 注册是幂等的，重复发布无害 / Registration is idempotent, republishing
    // is harmless
    server
        .publish_lifecycle(LifecycleEvent::register(&user_id, &server.node_id))
        .await;

    let welcome = WelcomeFrame::new("Welcome to v-chat-relay");
    let _ = server.send_json_to_user(&user_id, &welcome);

    if server.is_gateway() {
        server.broadcast_presence(&user_id, PresenceStatus::Online);
    }

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = crate::ws::handler::dispatch_inbound(&server, &user_id, &text).await
                {
                    error!("Error handling message from {}: {}", user_id, e);
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error from {}: {}", user_id, e);
                break;
            }
        }
    }

    // 仅当表里仍是本连接时才移除，防止误删快速重连建立的新连接
    // Remove only while the table still holds this connection, so a fresh
    // fast-reconnect entry is never clobbered
    let removed = server
        .connections
        .remove_if(&user_id, |_, conn| conn.sender.same_channel(&tx))
        .is_some();
    send_task.abort();

    if removed {
        info!("👋 User {} disconnected", user_id);
        server
            .publish_lifecycle(LifecycleEvent::unregister(&user_id, &server.node_id))
            .await;
        if server.is_gateway() {
            server.broadcast_presence(&user_id, PresenceStatus::Offline);
        }
    } else {
        debug!("connection for user {} already replaced, skipping unregister", user_id);
    }
    Ok(())
}

fn parse_user_id(query: &str) -> Option<String> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("userId="))
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::parse_user_id;

    #[test]
    fn parses_user_id_from_query() {
        assert_eq!(parse_user_id("userId=u1").as_deref(), Some("u1"));
        assert_eq!(parse_user_id("a=b&userId=u2&c=d").as_deref(), Some("u2"));
        assert_eq!(parse_user_id("userId="), None);
        assert_eq!(parse_user_id("other=x"), None);
    }
}
