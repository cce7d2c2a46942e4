//! Client routes
//!
//! - PUT    /apps/{service}/{instance_id}           register (JSON body) or renew (empty body)
//! - DELETE /apps/{service}/{instance_id}           cancel
//! - PUT    /apps/{service}/{instance_id}/status    change status, `?value=UP|DOWN|...`
//! - GET    /apps/{service}                         UP instances of one service
//! - GET    /apps                                   UP instances of every service
//! - GET    /apps/{service}/{instance_id}           one instance, any status

use std::collections::BTreeMap;

use actix_web::{Responder, delete, get, put, web};
use tracing::{debug, info};
use validator::Validate;

use registrar_api::validation::{validate_instance_id, validate_service_name};
use registrar_api::{Lease, LeaseStatus, RegisterRequest, StatusQuery};
use registrar_common::RegistrarError;
use registrar_naming::Registration;

use crate::model::AppState;
use crate::model::response::{Result, http_bad_request, http_error};

fn check_names(service: &str, instance_id: &str) -> std::result::Result<(), String> {
    validate_service_name(service).map_err(|e| format!("invalid service name: {}", e.code))?;
    validate_instance_id(instance_id).map_err(|e| format!("invalid instance id: {}", e.code))
}

/// Register when a body is present, renew otherwise
///
/// A renewal of an unknown instance answers 404 so the client re-registers.
#[put("/{service}/{instance_id}")]
pub async fn register_or_renew(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> impl Responder {
    let (service, instance_id) = path.into_inner();
    if let Err(message) = check_names(&service, &instance_id) {
        return http_bad_request(message);
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return match data.node.renew(&service, &instance_id) {
            Ok(lease) => {
                debug!(service = %service, instance_id = %instance_id, "Lease renewed");
                Result::<Lease>::http_success(lease)
            }
            Err(e) => http_error(&e),
        };
    }

    let request: RegisterRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return http_bad_request(format!("malformed registration body: {}", e)),
    };
    if let Err(e) = request.validate() {
        return http_bad_request(e.to_string());
    }

    match data
        .node
        .register(Registration::from_request(&service, &instance_id, request))
    {
        Ok(lease) => {
            info!(
                service = %service,
                instance_id = %instance_id,
                endpoint = %lease.endpoint,
                version = lease.version,
                "Instance registered"
            );
            Result::<Lease>::http_success(lease)
        }
        Err(e) => http_error(&e),
    }
}

/// Always 200; `data` tells whether a lease was removed
#[delete("/{service}/{instance_id}")]
pub async fn cancel(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (service, instance_id) = path.into_inner();
    if let Err(message) = check_names(&service, &instance_id) {
        return http_bad_request(message);
    }

    match data.node.cancel(&service, &instance_id) {
        Ok(tombstone) => {
            if tombstone.is_some() {
                info!(service = %service, instance_id = %instance_id, "Instance cancelled");
            }
            Result::<bool>::http_success(tombstone.is_some())
        }
        Err(e) => http_error(&e),
    }
}

#[put("/{service}/{instance_id}/status")]
pub async fn change_status(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    query: web::Query<StatusQuery>,
) -> impl Responder {
    let (service, instance_id) = path.into_inner();
    if let Err(message) = check_names(&service, &instance_id) {
        return http_bad_request(message);
    }
    if query.value.is_empty() {
        return http_bad_request("Required parameter 'value' is missing");
    }
    let status: LeaseStatus = match query.value.parse() {
        Ok(status) => status,
        Err(message) => return http_bad_request(message),
    };

    match data.node.set_status(&service, &instance_id, status) {
        Ok(lease) => {
            info!(
                service = %service,
                instance_id = %instance_id,
                status = %lease.status,
                "Instance status changed"
            );
            Result::<Lease>::http_success(lease)
        }
        Err(e) => http_error(&e),
    }
}

#[get("")]
pub async fn list_all(data: web::Data<AppState>) -> impl Responder {
    match data.node.lookup_all() {
        Ok(catalog) => Result::<BTreeMap<String, Vec<Lease>>>::http_success(catalog.as_ref()),
        Err(e) => http_error(&e),
    }
}

/// Unknown services answer an empty list
#[get("/{service}")]
pub async fn list_service(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    match data.node.lookup(&path) {
        Ok(leases) => Result::<Vec<Lease>>::http_success(leases.as_ref()),
        Err(e) => http_error(&e),
    }
}

#[get("/{service}/{instance_id}")]
pub async fn get_instance(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (service, instance_id) = path.into_inner();
    match data.node.lookup_instance(&service, &instance_id) {
        Ok(Some(lease)) => Result::<Lease>::http_success(lease),
        Ok(None) => http_error(&RegistrarError::not_found(&service, &instance_id)),
        Err(e) => http_error(&e),
    }
}
