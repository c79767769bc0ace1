use axum::Json;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures the relay synthesizes itself. Upstream error responses are
/// relayed verbatim by the forwarder and never take this shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Proxy credential mismatch; rejected before any upstream call.
    #[error("invalid proxy API key")]
    AuthRejected,
    /// Neither the override header nor the configured default supplied a
    /// key source.
    #[error("no keys provided")]
    MissingKeys,
    /// A key source was present but nothing survived parsing.
    #[error("keys list is empty")]
    EmptyKeys,
    /// Every key either network-failed or was rejected with a 4xx.
    #[error("all keys failed")]
    AllKeysFailed,
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::AuthRejected => StatusCode::UNAUTHORIZED,
            RelayError::MissingKeys | RelayError::EmptyKeys => StatusCode::BAD_REQUEST,
            RelayError::AllKeysFailed => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        json_error(self.status(), &self.to_string())
    }
}

/// `{"error": "<message>"}` with the permissive CORS header every relay
/// response carries.
pub(super) fn json_error(status: StatusCode, message: &str) -> Response {
    let mut resp = (status, Json(serde_json::json!({ "error": message }))).into_response();
    resp.headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    resp
}
