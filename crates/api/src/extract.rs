use crate::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use finverse_core::domain::transaction::UserId;

/// Set by the identity gateway in front of the API.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller. Requests without an identity are rejected
/// before any handler runs.
#[derive(Debug, Clone)]
pub struct CallerId(pub UserId);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(UserId::new)
            .map(CallerId)
            .ok_or(ApiError::Unauthenticated)
    }
}
