//! HTTP server setup

use std::sync::Arc;
use std::time::Duration;

use actix_web::body::MessageBody;
use actix_web::dev::{Server, ServiceRequest, ServiceResponse};
use actix_web::middleware::{Logger, Next, from_fn};
use actix_web::{App, HttpServer, web};

use crate::api::route;
use crate::metrics::{Timer, record_http_request};
use crate::model::AppState;

/// Record count and latency per matched route pattern
pub async fn track_requests(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let timer = Timer::new();
    let method = req.method().to_string();
    let response = next.call(req).await?;
    let pattern = response
        .request()
        .match_pattern()
        .unwrap_or_else(|| "unmatched".to_string());
    record_http_request(
        &method,
        &pattern,
        response.status().as_u16(),
        timer.elapsed_secs(),
    );
    Ok(response)
}

/// Bind the server serving client, peer and operational routes
///
/// OS signals are left to the caller so the node drains before the server
/// stops accepting requests.
pub fn http_server(
    app_state: Arc<AppState>,
    address: &str,
    port: u16,
    shutdown_timeout: Duration,
) -> Result<Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(from_fn(track_requests))
            .wrap(Logger::default())
            .app_data(web::Data::from(app_state.clone()))
            .configure(route::routes)
    })
    .disable_signals()
    .shutdown_timeout(shutdown_timeout.as_secs())
    .bind((address, port))?
    .run())
}
