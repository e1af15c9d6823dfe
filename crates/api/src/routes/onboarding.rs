use crate::app::AppState;
use crate::error::ApiError;
use crate::extract::CallerId;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use finverse_core::domain::account::{OnboardingMethod, OnboardingStatus};
use finverse_core::error::FinanceError;
use finverse_core::ledger;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CompleteOnboarding {
    method: String,
}

pub async fn status(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<OnboardingStatus>, ApiError> {
    Ok(Json(ledger::onboarding_status(state.store()?, &user).await?))
}

pub async fn complete(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    payload: Result<Json<CompleteOnboarding>, JsonRejection>,
) -> Result<Json<OnboardingStatus>, ApiError> {
    let Json(body) = payload?;
    let method: OnboardingMethod = body
        .method
        .trim()
        .parse()
        .map_err(|e: anyhow::Error| FinanceError::validation(e.to_string()))?;

    let status =
        ledger::complete_onboarding(state.store()?, &user, method, chrono::Utc::now()).await?;
    Ok(Json(status))
}
