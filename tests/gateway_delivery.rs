//! 本地投递网关、聊天路由与群组扇出集成测试
//! Local delivery gateway, chat routing and group fan-out integration tests

use anyhow::Result;
use futures_util::{SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use v_chat_relay::bus::{topics, MemoryBus, MessageBus};
use v_chat_relay::correlate::CorrelationClient;
use v_chat_relay::domain::message::{
    ChatForward, DeliverEnvelope, LifecycleEvent, MessageStatus, PresenceStatus,
};
use v_chat_relay::persist::{
    GroupDirectory, MemoryGroupDirectory, MemoryMessageRepository, MessageRepository,
};
use v_chat_relay::registry::SessionRegistry;
use v_chat_relay::server::{Connection, VChatRelayServer};
use v_chat_relay::service::router::ChatRouter;
use v_chat_relay::store::{MemoryStore, SessionStore};
use v_chat_relay::ws::handler::dispatch_inbound;

fn gateway_server(
    node_id: &str,
    bus: Arc<dyn MessageBus>,
) -> (VChatRelayServer, Arc<MemoryMessageRepository>, Arc<MemoryGroupDirectory>) {
    let repo = Arc::new(MemoryMessageRepository::new());
    let groups = Arc::new(MemoryGroupDirectory::new());
    let repo_dyn: Arc<dyn MessageRepository> = repo.clone();
    let groups_dyn: Arc<dyn GroupDirectory> = groups.clone();
    let server = VChatRelayServer::new(node_id.to_string(), bus)
        .with_gateway(repo_dyn, groups_dyn);
    (server, repo, groups)
}

/// 绕过真实套接字，把一个假连接挂进连接表
/// Attach a fake connection to the table, bypassing a real socket
fn attach_connection(
    server: &VChatRelayServer,
    user_id: &str,
) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    server.connections.insert(
        user_id.to_string(),
        Connection {
            user_id: user_id.to_string(),
            addr: "127.0.0.1:0".parse().expect("valid addr"),
            sender: tx,
            connected_at: chrono::Utc::now().timestamp_millis(),
        },
    );
    rx
}

async fn recv_frame_of_type(
    rx: &mut mpsc::UnboundedReceiver<Message>,
    frame_type: &str,
) -> serde_json::Value {
    loop {
        let msg = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("connection channel closed");
        if let Message::Text(text) = &msg {
            let value: serde_json::Value = serde_json::from_str(text).expect("valid json frame");
            if value["type"] == frame_type {
                return value;
            }
        }
    }
}

/// 场景D：收发双方都连在网关上，消息落库为 Delivered，双方各收到一份副本
/// Scenario D: sender and receiver both local to the gateway; the row is
/// Delivered and both sockets receive a copy
#[tokio::test]
async fn local_delivery_marks_delivered_and_reaches_both_sockets() -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let (server, repo, _groups) = gateway_server("gw-1", bus);
    let mut rx1 = attach_connection(&server, "u1");
    let mut rx2 = attach_connection(&server, "u2");

    dispatch_inbound(&server, "u1", r#"{"type":"chat","receiverId":"u2","content":"hi"}"#).await?;

    let ack = recv_frame_of_type(&mut rx1, "chat").await;
    let push = recv_frame_of_type(&mut rx2, "chat").await;
    assert_eq!(ack["data"]["content"], "hi");
    assert_eq!(ack["data"]["status"], "Delivered");
    assert_eq!(push["data"]["id"], ack["data"]["id"]);

    // 恰好一行，已投递且带时间戳 / Exactly one row, delivered and stamped
    assert_eq!(repo.len(), 1);
    let row = repo.get(ack["data"]["id"].as_str().expect("id")).expect("row exists");
    assert_eq!(row.status, MessageStatus::Delivered);
    assert!(row.delivered_at.is_some());
    Ok(())
}

/// 场景E：接收者不在线，行保持 Pending 且无投递时间戳
/// Scenario E: receiver offline, the row stays Pending with no delivery stamp
#[tokio::test]
async fn offline_receiver_stores_pending_row() -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let (server, repo, _groups) = gateway_server("gw-1", bus);
    let mut rx1 = attach_connection(&server, "u1");

    dispatch_inbound(&server, "u1", r#"{"type":"chat","receiverId":"u9","content":"hi"}"#).await?;

    let ack = recv_frame_of_type(&mut rx1, "chat").await;
    assert_eq!(ack["data"]["status"], "Pending");
    assert!(ack["data"].get("deliveredAt").is_none());

    assert_eq!(repo.len(), 1);
    let row = repo.get(ack["data"]["id"].as_str().expect("id")).expect("row exists");
    assert_eq!(row.status, MessageStatus::Pending);
    assert!(row.delivered_at.is_none());
    Ok(())
}

/// 校验失败只回错误帧，不落库
/// Validation failures answer with an error frame and persist nothing
#[tokio::test]
async fn invalid_chat_payload_is_dropped_with_error_frame() -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let (server, repo, _groups) = gateway_server("gw-1", bus);
    let mut rx1 = attach_connection(&server, "u1");

    dispatch_inbound(&server, "u1", r#"{"type":"chat","receiverId":"u2"}"#).await?;
    let error = recv_frame_of_type(&mut rx1, "error").await;
    assert_eq!(error["message"], "receiverId and content are required");

    dispatch_inbound(&server, "u1", "{not json").await?;
    let error = recv_frame_of_type(&mut rx1, "error").await;
    assert_eq!(error["message"], "invalid json");

    // 非聊天帧被静默忽略 / Non-chat frames are silently ignored
    dispatch_inbound(&server, "u1", r#"{"type":"typing"}"#).await?;
    assert!(rx1.try_recv().is_err());

    assert!(repo.is_empty());
    Ok(())
}

/// 边缘角色不落库，只发即忘转发到聊天主题
/// The edge role persists nothing and fire-and-forgets onto the chat topic
#[tokio::test]
async fn edge_node_forwards_chat_to_bus() -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let server = VChatRelayServer::new("edge-1".to_string(), Arc::clone(&bus));
    let mut forward_rx = bus.subscribe(topics::CHAT_FORWARD).await?;
    let _rx1 = attach_connection(&server, "u1");

    dispatch_inbound(&server, "u1", r#"{"type":"chat","receiverId":"u2","content":"hey"}"#)
        .await?;

    let payload = timeout(Duration::from_millis(500), forward_rx.recv())
        .await?
        .expect("forward published");
    let forward: ChatForward = serde_json::from_str(&payload)?;
    assert_eq!(forward.sender_id, "u1");
    assert_eq!(forward.receiver_id, "u2");
    assert_eq!(forward.content, "hey");
    Ok(())
}

/// 网关对本节点全部连接广播上下线 / The gateway broadcasts presence changes
/// to every local connection
#[tokio::test]
async fn presence_broadcast_reaches_all_local_connections() -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let (server, _repo, _groups) = gateway_server("gw-1", bus);
    let mut rx1 = attach_connection(&server, "u1");
    let mut rx2 = attach_connection(&server, "u2");

    server.broadcast_presence("u3", PresenceStatus::Online);

    for rx in [&mut rx1, &mut rx2] {
        let frame = recv_frame_of_type(rx, "presence").await;
        assert_eq!(frame["userId"], "u3");
        assert_eq!(frame["status"], "online");
    }
    Ok(())
}

/// 路由器：定位命中后发布节点定向投递帧并把行升级为 Delivered
/// Router: on a locate hit it publishes the node-scoped delivery frame and
/// upgrades the row to Delivered
#[tokio::test]
async fn router_routes_to_owning_node_and_marks_delivered() -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let store = Arc::new(MemoryStore::new());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let registry = Arc::new(SessionRegistry::new(
        Arc::clone(&bus),
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Duration::from_secs(60),
    ));
    registry.start(shutdown_rx.clone()).await?;

    let correlator = Arc::new(CorrelationClient::new(Arc::clone(&bus), Duration::from_millis(300)));
    Arc::clone(&correlator).start(shutdown_rx.clone()).await?;

    let repo = Arc::new(MemoryMessageRepository::new());
    let repo_dyn: Arc<dyn MessageRepository> = repo.clone();
    let router = Arc::new(ChatRouter::new(Arc::clone(&bus), correlator, repo_dyn));
    router.start(shutdown_rx).await?;

    // 接收者注册在 node-b / The receiver is registered on node-b
    bus.publish(
        topics::SESSION_LIFECYCLE,
        serde_json::to_string(&LifecycleEvent::register("u2", "node-b"))?,
    )
    .await?;
    sleep(Duration::from_millis(50)).await;

    let mut deliver_rx = bus.subscribe(&topics::chat_deliver("node-b")).await?;
    let forward = ChatForward {
        sender_id: "u1".to_string(),
        receiver_id: "u2".to_string(),
        content: "hello".to_string(),
        ts: chrono::Utc::now().timestamp_millis(),
    };
    bus.publish(topics::CHAT_FORWARD, serde_json::to_string(&forward)?).await?;

    let payload = timeout(Duration::from_millis(500), deliver_rx.recv())
        .await?
        .expect("delivery envelope published");
    let envelope: DeliverEnvelope = serde_json::from_str(&payload)?;
    assert_eq!(envelope.user_id, "u2");
    assert_eq!(envelope.frame["type"], "chat");

    sleep(Duration::from_millis(50)).await;
    assert_eq!(repo.len(), 1);
    let row = &repo.all()[0];
    assert_eq!(row.status, MessageStatus::Delivered);
    assert_eq!(row.content, "hello");
    Ok(())
}

/// 路由器：定位超时保持 Pending（接收者重连后自行拉取历史）
/// Router: a locate timeout leaves the row Pending (the receiver fetches
/// history on reconnect)
#[tokio::test]
async fn router_leaves_pending_row_on_lookup_timeout() -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    // 没有注册中心应答定位请求 / No registry answers lookup requests
    let correlator = Arc::new(CorrelationClient::new(Arc::clone(&bus), Duration::from_millis(50)));
    Arc::clone(&correlator).start(shutdown_rx.clone()).await?;
    let repo = Arc::new(MemoryMessageRepository::new());
    let repo_dyn: Arc<dyn MessageRepository> = repo.clone();
    let router = Arc::new(ChatRouter::new(Arc::clone(&bus), correlator, repo_dyn));
    router.start(shutdown_rx).await?;

    let forward = ChatForward {
        sender_id: "u1".to_string(),
        receiver_id: "u2".to_string(),
        content: "hello".to_string(),
        ts: chrono::Utc::now().timestamp_millis(),
    };
    bus.publish(topics::CHAT_FORWARD, serde_json::to_string(&forward)?).await?;
    sleep(Duration::from_millis(200)).await;

    assert_eq!(repo.len(), 1);
    let row = &repo.all()[0];
    assert_eq!(row.status, MessageStatus::Pending);
    assert!(row.delivered_at.is_none());
    Ok(())
}

/// 群组扇出：本地成员直接投递，远端成员经总线由各自网关投递，发起方不重复投递
/// Group fan-out: local members get direct delivery, remote members are
/// reached via the bus by their own gateways, the origin never double-delivers
#[tokio::test]
async fn group_fanout_reaches_local_and_remote_members_once() -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let (server_a, _repo_a, groups_a) = gateway_server("node-a", Arc::clone(&bus));
    let (server_b, _repo_b, groups_b) = gateway_server("node-b", Arc::clone(&bus));
    for groups in [&groups_a, &groups_b] {
        groups.add_member("g1", "u1");
        groups.add_member("g1", "u2");
    }
    let server_a = Arc::new(server_a);
    let server_b = Arc::new(server_b);
    Arc::clone(&server_a).spawn_group_events_consumer(shutdown_rx.clone()).await?;
    Arc::clone(&server_b).spawn_group_events_consumer(shutdown_rx).await?;

    let mut rx1 = attach_connection(&server_a, "u1");
    let mut rx2 = attach_connection(&server_b, "u2");

    let frame = serde_json::json!({"type": "group", "groupId": "g1", "event": "member-added"});
    let local = server_a.notify_group_members("g1", frame).await?;
    assert_eq!(local, 1);

    let direct = recv_frame_of_type(&mut rx1, "group").await;
    assert_eq!(direct["groupId"], "g1");
    let relayed = recv_frame_of_type(&mut rx2, "group").await;
    assert_eq!(relayed["groupId"], "g1");

    // 发起节点跳过自己的总线副本 / The origin skips its own bus copy
    sleep(Duration::from_millis(100)).await;
    assert!(rx1.try_recv().is_err());
    assert!(rx2.try_recv().is_err());
    Ok(())
}

async fn next_ws_frame_of_type<S>(ws: &mut S, frame_type: &str) -> serde_json::Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = timeout(Duration::from_millis(1000), ws.next())
            .await
            .expect("timed out waiting for ws frame")
            .expect("ws stream ended")
            .expect("ws error");
        if let Message::Text(text) = &msg {
            let value: serde_json::Value = serde_json::from_str(text).expect("valid json frame");
            if value["type"] == frame_type {
                return value;
            }
        }
    }
}

/// 端到端：真实WebSocket握手、注册事件、快速路径投递与断开注销
/// End-to-end: real WebSocket handshake, register events, fast-path delivery
/// and unregister on disconnect
#[tokio::test]
async fn websocket_end_to_end_roundtrip() -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let mut lifecycle_rx = bus.subscribe(topics::SESSION_LIFECYCLE).await?;
    let (server, repo, _groups) = gateway_server("gw-e2e", Arc::clone(&bus));
    let server = Arc::new(server);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(Arc::clone(&server).run_with_listener(listener));

    let (mut ws1, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/?userId=u1", addr)).await?;
    let (mut ws2, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/?userId=u2", addr)).await?;

    for _ in 0..50 {
        if server.connections.len() == 2 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.connections.len(), 2);

    // 两个注册事件已发布 / Both register events were published
    for _ in 0..2 {
        let payload = timeout(Duration::from_millis(500), lifecycle_rx.recv())
            .await?
            .expect("lifecycle event");
        let event: LifecycleEvent = serde_json::from_str(&payload)?;
        assert_eq!(event.server_id, "gw-e2e");
    }

    ws1.send(Message::Text(
        r#"{"type":"chat","receiverId":"u2","content":"hi"}"#.to_string(),
    ))
    .await?;

    let ack = next_ws_frame_of_type(&mut ws1, "chat").await;
    let push = next_ws_frame_of_type(&mut ws2, "chat").await;
    assert_eq!(ack["data"]["status"], "Delivered");
    assert_eq!(push["data"]["content"], "hi");
    assert_eq!(repo.len(), 1);

    // 断开发布注销事件 / Disconnect publishes the unregister event
    ws1.close(None).await?;
    let payload = timeout(Duration::from_millis(500), lifecycle_rx.recv())
        .await?
        .expect("unregister event");
    let event: LifecycleEvent = serde_json::from_str(&payload)?;
    assert_eq!(event.user_id, "u1");
    Ok(())
}

/// 握手缺少 userId 时以 4001 关闭 / Missing userId closes the handshake with
/// 4001
#[tokio::test]
async fn handshake_without_user_id_is_rejected() -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let server = Arc::new(VChatRelayServer::new("edge-1".to_string(), bus));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(Arc::clone(&server).run_with_listener(listener));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/", addr)).await?;
    let msg = timeout(Duration::from_millis(500), ws.next())
        .await?
        .expect("server frame")?;
    match msg {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Library(4001)),
        other => panic!("expected close frame, got {:?}", other),
    }
    assert!(server.connections.is_empty());
    Ok(())
}
