//! 运维HTTP接口 / Ops HTTP surface
//!
//! 仅健康检查与连接列表；CRUD属于外部服务。
//! Health check and connection listing only; CRUD lives in external services.

pub mod v1;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    v1::health::register(cfg, v1::health::ROUTE_PATH);
    v1::connections::register(cfg, v1::connections::ROUTE_PATH);
    v1::group_notify::register(cfg, v1::group_notify::ROUTE_PATH);
}
