use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;

use crate::VChatRelayServer;

pub const ROUTE_PATH: &str = "/api/v1/internal/group/notify";

/// 群组通知请求：外部CRUD服务在成员变更后调用
/// Group notify request: called by the external CRUD service after a
/// membership change
#[derive(serde::Deserialize)]
pub struct GroupNotifyRequest {
    #[serde(rename = "groupId")]
    pub group_id: String,
    pub frame: serde_json::Value,
}

// 路由注册入口（POST）
// Route registration entry (POST)
pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::post().to(group_notify_handle)));
}

// 触发群组扇出：本地成员直接投递，其余经总线到各自的网关
// Trigger group fan-out: local members directly, the rest via the bus to
// their own gateways
pub async fn group_notify_handle(
    server: web::Data<Arc<VChatRelayServer>>,
    req: web::Json<GroupNotifyRequest>,
) -> impl Responder {
    match server.notify_group_members(&req.group_id, req.frame.clone()).await {
        Ok(local_count) => HttpResponse::Ok()
            .json(serde_json::json!({ "ok": true, "localDelivered": local_count })),
        Err(e) => HttpResponse::BadRequest()
            .json(serde_json::json!({ "ok": false, "error": format!("{}", e) })),
    }
}
