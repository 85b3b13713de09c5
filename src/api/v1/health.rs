use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;

use crate::VChatRelayServer;

pub const ROUTE_PATH: &str = "/api/v1/health";

// 路由注册入口（GET）
// Route registration entry (GET)
pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(health_handle)));
}

// 基础健康检查
// Basic health check
pub async fn health_handle(server: web::Data<Arc<VChatRelayServer>>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "nodeId": server.node_id,
        "connections": server.connections.len(),
        "uptimeMs": chrono::Utc::now().timestamp_millis() - server.started_at,
    }))
}
