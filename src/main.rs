use actix_web::{web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use v_chat_relay::bus::{MemoryBus, MessageBus, RedisBus};
use v_chat_relay::config::RelayConfig;
use v_chat_relay::correlate::CorrelationClient;
use v_chat_relay::persist::{
    GroupDirectory, MemoryGroupDirectory, MemoryMessageRepository, MessageRepository,
};
use v_chat_relay::registry::SessionRegistry;
use v_chat_relay::service::presence::PresenceHook;
use v_chat_relay::service::router::ChatRouter;
use v_chat_relay::store::{MemoryStore, RedisStore, SessionStore};
use v_chat_relay::{api, config, init_tracing, tasks, VChatRelayServer};

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "v-chat-relay WebSocket & HTTP relay node", long_about = None)]
pub struct Args {
    /// 配置文件路径（TOML）/ Config file path (TOML)
    #[arg(short = 'c', long = "config", default_value = "config/default.toml")]
    config: String,

    /// 进程角色 / Process role
    #[arg(short = 'r', long = "role", value_enum, default_value = "all")]
    role: Role,

    /// 覆盖配置中的节点ID / Override the configured node id
    #[arg(long = "node-id")]
    node_id: Option<String>,
}

/// 进程角色 / Process role
///
/// edge 无状态边缘节点；registry 会话注册中心；router 聊天路由器；gateway
/// 带本地投递快速路径的边缘节点；all 单进程内全部角色（开发/演示）。
/// edge is a stateless edge node; registry the session registry; router the
/// chat router; gateway an edge node with the local delivery fast path; all
/// hosts every role in one process (development/demo).
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Edge,
    Registry,
    Router,
    Gateway,
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志 / Initialize logging
    init_tracing();

    let args = Args::parse();
    info!("🎯 Starting v-chat-relay ({:?} role)...", args.role);

    let mut cfg = config::load(&args.config)?;
    info!("🔧 Loaded config file: {}", args.config);
    if let Some(node_id) = args.node_id {
        cfg.server.node_id = node_id;
    }

    let bus = build_bus(&cfg).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if matches!(args.role, Role::Registry | Role::All) {
        let store = build_store(&cfg).await?;
        let hook = PresenceHook::new(cfg.presence_hook.clone());
        let registry = Arc::new(
            SessionRegistry::new(
                Arc::clone(&bus),
                store,
                Duration::from_secs(cfg.registry.session_ttl_secs),
            )
            .with_presence_hook(hook),
        );
        registry.start(shutdown_rx.clone()).await?;
    }

    if matches!(args.role, Role::Router | Role::All) {
        let correlator = Arc::new(CorrelationClient::new(
            Arc::clone(&bus),
            Duration::from_millis(cfg.registry.lookup_timeout_ms),
        ));
        Arc::clone(&correlator).start(shutdown_rx.clone()).await?;
        // 外部持久化API的内存替身；生产部署接真实仓库实现
        // In-memory stand-in for the external persistence API; production
        // wires a real repository implementation
        let messages: Arc<dyn MessageRepository> = Arc::new(MemoryMessageRepository::new());
        let router = Arc::new(ChatRouter::new(Arc::clone(&bus), correlator, messages));
        router.start(shutdown_rx.clone()).await?;
    }

    if matches!(args.role, Role::Edge | Role::Gateway | Role::All) {
        let mut server = VChatRelayServer::new(cfg.server.node_id.clone(), Arc::clone(&bus));
        if matches!(args.role, Role::Gateway | Role::All) {
            let messages: Arc<dyn MessageRepository> = Arc::new(MemoryMessageRepository::new());
            let groups: Arc<dyn GroupDirectory> = Arc::new(MemoryGroupDirectory::new());
            server = server.with_gateway(messages, groups);
        }
        let server = Arc::new(server);

        Arc::clone(&server).spawn_node_delivery_consumer(shutdown_rx.clone()).await?;
        if server.is_gateway() {
            Arc::clone(&server).spawn_group_events_consumer(shutdown_rx.clone()).await?;
        }
        tasks::heartbeat::spawn_reregister_task(
            Arc::clone(&server),
            cfg.registry.reregister_interval_secs,
            shutdown_rx.clone(),
        );

        let http_server = Arc::clone(&server);
        let (http_host, http_port) = (cfg.server.host.clone(), cfg.server.http_port);
        tokio::spawn(async move {
            if let Err(e) = start_http_server(http_server, http_host, http_port).await {
                error!("HTTP server exited: {}", e);
            }
        });

        let ws_server = Arc::clone(&server);
        let (ws_host, ws_port) = (cfg.server.host.clone(), cfg.server.ws_port);
        tokio::spawn(async move {
            if let Err(e) = ws_server.run(ws_host, ws_port).await {
                error!("WebSocket server exited: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutdown signal received");
    let _ = shutdown_tx.send(true);
    // 给后台任务一次退出机会 / Give background tasks a chance to stop
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

/// 启动HTTP服务器 / Start HTTP server
async fn start_http_server(
    server: Arc<VChatRelayServer>,
    host: String,
    port: u16,
) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    info!("🌐 HTTP API starting on http://{}", addr);
    info!("   GET {} - Basic health check", api::v1::health::ROUTE_PATH);
    info!("   GET {} - Local connection list", api::v1::connections::ROUTE_PATH);
    let http_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(Arc::clone(&server)))
            .configure(api::configure)
    })
    .bind(addr)?
    .run();
    http_server.await?;
    Ok(())
}

async fn build_bus(cfg: &RelayConfig) -> Result<Arc<dyn MessageBus>> {
    let bus: Arc<dyn MessageBus> = match cfg.bus.backend.as_str() {
        "redis" => {
            info!("🚌 Using Redis bus: {}", cfg.bus.redis_url);
            Arc::new(RedisBus::connect(&cfg.bus.redis_url).await?)
        }
        _ => {
            info!("🚌 Using in-process memory bus (single-process deployments only)");
            Arc::new(MemoryBus::new())
        }
    };
    Ok(bus)
}

async fn build_store(cfg: &RelayConfig) -> Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match cfg.store.backend.as_str() {
        "redis" => {
            info!("🗄️ Using Redis session store: {}", cfg.store.redis_url);
            Arc::new(RedisStore::connect(&cfg.store.redis_url).await?)
        }
        _ => {
            info!("🗄️ Using in-process memory session store");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}
