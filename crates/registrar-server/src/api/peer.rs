//! Peer routes, called only by other registry nodes
//!
//! - POST /peer/events      merge a batch of replication records
//! - GET  /peer/snapshot    full registry state, tombstones included

use actix_web::{Responder, get, post, web};
use tracing::debug;

use registrar_api::{PushEventsRequest, PushEventsResponse, RegistrySnapshot};

use crate::model::AppState;
use crate::model::response::{Result, http_error};

#[post("/events")]
pub async fn push_events(
    data: web::Data<AppState>,
    request: web::Json<PushEventsRequest>,
) -> impl Responder {
    match data.node.apply_events(&request) {
        Ok(response) => {
            debug!(
                origin = %request.origin,
                applied = response.applied,
                ignored = response.ignored,
                rejected = response.rejected,
                "Merged peer batch"
            );
            Result::<PushEventsResponse>::http_success(response)
        }
        Err(e) => http_error(&e),
    }
}

#[get("/snapshot")]
pub async fn snapshot(data: web::Data<AppState>) -> impl Responder {
    match data.node.snapshot() {
        Ok(snapshot) => {
            debug!(
                leases = snapshot.lease_count(),
                tombstones = snapshot.tombstones.len(),
                "Serving snapshot to peer"
            );
            Result::<RegistrySnapshot>::http_success(snapshot)
        }
        Err(e) => http_error(&e),
    }
}
