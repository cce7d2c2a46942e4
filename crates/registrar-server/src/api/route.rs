//! Route table

use actix_web::error::InternalError;
use actix_web::{Scope, web};

use crate::model::response::http_bad_request;

use super::{apps, ops, peer};

/// Peer batches can be large
const JSON_PAYLOAD_LIMIT: usize = 16 * 1024 * 1024;

/// Client routes under `/apps`
pub fn app_routes() -> Scope {
    web::scope("/apps")
        .service(apps::list_all)
        .service(apps::change_status)
        .service(apps::register_or_renew)
        .service(apps::cancel)
        .service(apps::get_instance)
        .service(apps::list_service)
}

/// Peer routes under `/peer`
pub fn peer_routes() -> Scope {
    web::scope("/peer")
        .service(peer::push_events)
        .service(peer::snapshot)
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_PAYLOAD_LIMIT)
        .error_handler(|err, _req| {
            let response = http_bad_request(format!("malformed request body: {}", err));
            InternalError::from_response(err, response).into()
        })
}

/// Register every route and extractor setting on an app
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(app_routes())
        .service(peer_routes())
        .service(ops::health)
        .service(ops::status)
        .service(ops::metrics);
}
