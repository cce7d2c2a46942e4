//! HTTP response envelope
//!
//! Every route answers `{code, message, data}`; `code == 0` is success and
//! anything else is an `ErrorCode` from `registrar_common::error`.

use actix_web::{HttpResponse, HttpResponseBuilder, http::StatusCode};
use serde::{Deserialize, Serialize};

use registrar_common::RegistrarError;
use registrar_common::error::{PARAMETER_VALIDATE_ERROR, SUCCESS};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Result<T> {
    pub code: i32,
    pub message: String,
    pub data: T,
}

impl<T> Result<T> {
    pub fn new(code: i32, message: String, data: T) -> Self {
        Result::<T> {
            code,
            message,
            data,
        }
    }

    pub fn success(data: T) -> Result<T> {
        Result::<T> {
            code: SUCCESS.code,
            message: SUCCESS.message.to_string(),
            data,
        }
    }

    pub fn http_success(data: impl Serialize) -> HttpResponse {
        HttpResponse::Ok().json(Result::success(data))
    }

    pub fn http_response(
        status: u16,
        code: i32,
        message: String,
        data: impl Serialize,
    ) -> HttpResponse {
        HttpResponseBuilder::new(StatusCode::from_u16(status).unwrap_or_default())
            .json(Result::new(code, message, data))
    }
}

/// HTTP status for a registry error
pub fn status_of(err: &RegistrarError) -> StatusCode {
    match err {
        RegistrarError::IllegalArgument(_) => StatusCode::BAD_REQUEST,
        RegistrarError::NotFound { .. } => StatusCode::NOT_FOUND,
        RegistrarError::ConflictIgnored { .. } => StatusCode::CONFLICT,
        RegistrarError::PeerUnreachable { .. } => StatusCode::BAD_GATEWAY,
        RegistrarError::NotReady(_) | RegistrarError::Draining => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RegistrarError::InvariantViolation(_) | RegistrarError::Config(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Error envelope carrying the error code and message, with null data
pub fn http_error(err: &RegistrarError) -> HttpResponse {
    HttpResponseBuilder::new(status_of(err)).json(Result::new(
        err.error_code().code,
        err.to_string(),
        (),
    ))
}

pub fn http_bad_request(message: impl Into<String>) -> HttpResponse {
    Result::<()>::http_response(400, PARAMETER_VALIDATE_ERROR.code, message.into(), ())
}

#[cfg(test)]
mod tests {
    use actix_web::body::to_bytes;

    use registrar_common::error::{INSTANCE_NOT_FOUND, NODE_DRAINING};

    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(&RegistrarError::not_found("billing", "i-1")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(&RegistrarError::IllegalArgument("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&RegistrarError::NotReady("WARMING".to_string())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(&RegistrarError::Draining),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(&RegistrarError::InvariantViolation("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[actix_web::test]
    async fn test_error_envelope() {
        let response = http_error(&RegistrarError::not_found("billing", "i-1"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["code"], INSTANCE_NOT_FOUND.code);
        assert!(value["data"].is_null());
        assert_eq!(
            value["message"],
            "instance 'i-1' of service 'billing' not found"
        );

        let response = http_error(&RegistrarError::Draining);
        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["code"], NODE_DRAINING.code);
    }

    #[actix_web::test]
    async fn test_success_envelope() {
        let response = Result::<Vec<i32>>::http_success(vec![1, 2]);
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["code"], 0);
        assert_eq!(value["message"], "success");
        assert_eq!(value["data"], serde_json::json!([1, 2]));
    }
}
