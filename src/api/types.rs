//! Error envelope for the OpenAI-compatible surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};

/// API error response in OpenAI format.
///
/// The HTTP status travels alongside the body instead of being re-derived
/// from the error code, because upstream errors carry the worker's numeric
/// code in the envelope while still mapping to 502.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    pub error: ApiErrorBody,
}

/// Error details.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorBody {
    pub message: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
}

impl ApiError {
    fn new(status: StatusCode, message: &str, kind: &str, code: Option<Value>) -> Self {
        Self {
            status,
            error: ApiErrorBody {
                message: message.to_string(),
                r#type: kind.to_string(),
                code,
            },
        }
    }

    /// 401 for a missing, malformed, or unknown API key.
    pub fn unauthorized(message: &str) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            message,
            "invalid_request_error",
            Some(json!("invalid_api_key")),
        )
    }

    /// 429 when the key exhausted its per-minute budget.
    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded",
            "rate_limit_error",
            Some(json!("rate_limit_exceeded")),
        )
    }

    /// 403 when the key's allow-list excludes the requested model.
    pub fn forbidden(message: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            message,
            "invalid_request_error",
            Some(json!("model_not_allowed")),
        )
    }

    /// 400 for unparsable request bodies.
    pub fn bad_request(message: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message,
            "invalid_request_error",
            None,
        )
    }

    /// 404 for a model no connected worker advertises.
    pub fn model_not_found(model: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            &format!("The model '{model}' does not exist"),
            "invalid_request_error",
            Some(json!("model_not_found")),
        )
    }

    /// 503 when dispatch found no usable worker.
    pub fn service_unavailable(message: &str) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message,
            "server_error",
            Some(json!("service_unavailable")),
        )
    }

    /// 502 carrying the worker's ERROR frame; `code` keeps the frame's
    /// numeric code.
    pub fn upstream(code: u16, message: &str) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            message,
            "upstream_error",
            Some(json!(code)),
        )
    }

    /// 500 for broken streams and other gateway-side failures.
    pub fn internal(message: &str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            "server_error",
            None,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
