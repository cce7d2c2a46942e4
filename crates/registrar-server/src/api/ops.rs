//! Operational routes: health, status and Prometheus metrics

use actix_web::{HttpResponse, Responder, get, web};

use registrar_api::{NodeHealth, NodeStatus};
use registrar_common::error::NODE_NOT_READY;

use crate::metrics::update_node_gauges;
use crate::model::AppState;
use crate::model::response::Result;

/// 200 while serving, 503 in every other state
#[get("/health")]
pub async fn health(data: web::Data<AppState>) -> impl Responder {
    let health = data.node.health();
    if health.ready {
        Result::<NodeHealth>::http_success(health)
    } else {
        let message = format!("node is {}", health.state);
        Result::<NodeHealth>::http_response(503, NODE_NOT_READY.code, message, health)
    }
}

#[get("/status")]
pub async fn status(data: web::Data<AppState>) -> impl Responder {
    Result::<NodeStatus>::http_success(data.node.status())
}

#[get("/metrics")]
pub async fn metrics(data: web::Data<AppState>) -> impl Responder {
    update_node_gauges(&data.node);
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(data.prometheus.render())
}
