use crate::app::AppState;
use crate::error::ApiError;
use crate::extract::CallerId;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use finverse_core::domain::report::Report;
use finverse_core::report::{self, GeneratedReport, ReportRequest};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ReportHistory {
    reports: Vec<Report>,
}

pub async fn generate(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    payload: Result<Json<ReportRequest>, JsonRejection>,
) -> Result<Json<GeneratedReport>, ApiError> {
    let Json(request) = payload?;
    let generated =
        report::generate_report(state.store()?, state.llm()?, &user, request, Utc::now()).await?;
    Ok(Json(generated))
}

pub async fn history(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<ReportHistory>, ApiError> {
    let reports = report::report_history(state.store()?, &user).await?;
    Ok(Json(ReportHistory { reports }))
}
