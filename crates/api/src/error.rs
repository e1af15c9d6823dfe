use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use finverse_core::error::FinanceError;
use serde_json::json;

/// Everything a handler can fail with, rendered as `{ "error", "message" }`.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated,
    /// A backing service is not configured or could not be reached at startup.
    Unavailable(&'static str),
    BadRequest(String),
    Finance(FinanceError),
}

impl From<FinanceError> for ApiError {
    fn from(value: FinanceError) -> Self {
        ApiError::Finance(value)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        ApiError::BadRequest(value.body_text())
    }
}

fn body(status: StatusCode, error: &str, message: String) -> Response {
    (status, Json(json!({ "error": error, "message": message }))).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthenticated => body(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Not authenticated".to_string(),
            ),
            ApiError::Unavailable(what) => body(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                format!("{what} is not available"),
            ),
            ApiError::BadRequest(message) => body(StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Finance(err) => match err {
                FinanceError::NotFound(_) => {
                    body(StatusCode::NOT_FOUND, "not_found", err.to_string())
                }
                FinanceError::Validation(message) => {
                    body(StatusCode::BAD_REQUEST, "validation_failed", message)
                }
                FinanceError::NoData {
                    ref time_range,
                    ref categories,
                } => (
                    StatusCode::NOT_FOUND,
                    Json(json!({
                        "error": "no_data",
                        "message": err.to_string(),
                        "time_range": time_range,
                        "categories": categories,
                    })),
                )
                    .into_response(),
                FinanceError::Upstream(err) => {
                    sentry_anyhow::capture_anyhow(&err);
                    tracing::error!(error = %format!("{err:#}"), "request failed");
                    body(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "upstream_failure",
                        "Something went wrong. Please try again.".to_string(),
                    )
                }
            },
        }
    }
}
