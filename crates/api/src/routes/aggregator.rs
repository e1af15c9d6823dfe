use crate::app::AppState;
use crate::error::ApiError;
use crate::extract::CallerId;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use finverse_core::aggregator::types::LinkToken;
use finverse_core::domain::account::LinkedItemView;
use finverse_core::sync::{self, LinkOutcome, SyncOutcome};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    public_token: String,
}

pub async fn link_token(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<LinkToken>, ApiError> {
    Ok(Json(sync::create_link_token(state.aggregator()?, &user).await?))
}

pub async fn exchange(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    payload: Result<Json<ExchangeRequest>, JsonRejection>,
) -> Result<Json<LinkOutcome>, ApiError> {
    let Json(body) = payload?;
    let outcome = sync::link_account(
        state.store()?,
        state.aggregator()?,
        &user,
        &body.public_token,
        Utc::now(),
    )
    .await?;
    Ok(Json(outcome))
}

pub async fn sync_now(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<SyncOutcome>, ApiError> {
    let outcome = sync::sync_now(state.store()?, state.aggregator()?, &user, Utc::now()).await?;
    Ok(Json(outcome))
}

pub async fn accounts(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<LinkedItemView>, ApiError> {
    Ok(Json(sync::linked_accounts(state.store()?, &user).await?))
}
