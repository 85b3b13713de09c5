use anyhow::Result;
use serde::Deserialize;

/// 服务端配置 / Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_node_id")]
    pub node_id: String,
}

/// 总线后端配置 / Bus backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

/// 共享会话存储配置 / Shared session store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

/// 注册中心配置 / Registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// 会话存活TTL，由边缘节点周期性重注册刷新；过期视为隐式注销
    /// Session liveness TTL, refreshed by periodic re-registration; expiry is
    /// an implicit unregister
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_reregister_interval_secs")]
    pub reregister_interval_secs: u64,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

/// 在线状态回调配置 / Presence hook configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PresenceHookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_hook_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub secret: Option<String>,
}

/// 顶层配置 / Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub presence_hook: PresenceHookConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            ws_port: default_ws_port(),
            http_port: default_http_port(),
            node_id: default_node_id(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { backend: default_backend(), redis_url: default_redis_url() }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: default_backend(), redis_url: default_redis_url() }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            reregister_interval_secs: default_reregister_interval_secs(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
        }
    }
}

/// 加载配置文件并叠加环境变量（前缀 V_CHAT_RELAY，层级用 __ 分隔）
/// Load the config file and layer env overrides (prefix V_CHAT_RELAY,
/// sections separated by __)
pub fn load(path: &str) -> Result<RelayConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(config::Environment::with_prefix("V_CHAT_RELAY").separator("__"))
        .build()?;
    let mut relay: RelayConfig = cfg.try_deserialize()?;
    if relay.server.node_id.is_empty() {
        relay.server.node_id = default_node_id();
    }
    Ok(relay)
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_ws_port() -> u16 {
    5300
}
fn default_http_port() -> u16 {
    8085
}
fn default_node_id() -> String {
    "node-local".to_string()
}
fn default_backend() -> String {
    "memory".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_session_ttl_secs() -> u64 {
    60
}
fn default_reregister_interval_secs() -> u64 {
    20
}
fn default_lookup_timeout_ms() -> u64 {
    5000
}
fn default_hook_timeout_ms() -> u64 {
    3000
}
