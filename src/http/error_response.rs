//! Maps `CoreError` to the JSON error body + status code the REST
//! surface returns.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::CoreError;

pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
