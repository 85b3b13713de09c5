use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;

use crate::domain::message::OnlineConnectionsResponse;
use crate::VChatRelayServer;

pub const ROUTE_PATH: &str = "/api/v1/connection/list";

// 路由注册入口（GET）
// Route registration entry (GET)
pub fn register(cfg: &mut web::ServiceConfig, path: &str) {
    cfg.service(web::resource(path).route(web::get().to(connection_list_handle)));
}

// 获取本节点连接列表
// Get this node's connection list
pub async fn connection_list_handle(server: web::Data<Arc<VChatRelayServer>>) -> impl Responder {
    let connections = server.online_connections();
    let total_count = connections.len();
    HttpResponse::Ok().json(OnlineConnectionsResponse { connections, total_count })
}
