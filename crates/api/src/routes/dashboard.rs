use crate::app::AppState;
use crate::error::ApiError;
use crate::extract::CallerId;
use axum::extract::State;
use axum::Json;
use finverse_core::dashboard::{
    self, CategoryRow, DailyRow, DashboardOverview, MonthlyRow, RecentRow,
};
use finverse_core::domain::snapshot::SnapshotRecord;

pub async fn overview(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<DashboardOverview>, ApiError> {
    Ok(Json(dashboard::overview(state.store()?, &user).await?))
}

pub async fn refresh(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<SnapshotRecord>, ApiError> {
    Ok(Json(dashboard::refresh(state.store()?, &user).await?))
}

pub async fn recent(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<Vec<RecentRow>>, ApiError> {
    Ok(Json(dashboard::recent(state.store()?, &user).await?))
}

pub async fn daily(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<Vec<DailyRow>>, ApiError> {
    let record = dashboard::current_snapshot(state.store()?, &user).await?;
    Ok(Json(dashboard::daily_rows(&record.snapshot)))
}

pub async fn monthly(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<Vec<MonthlyRow>>, ApiError> {
    let record = dashboard::current_snapshot(state.store()?, &user).await?;
    Ok(Json(dashboard::monthly_rows(&record.snapshot)))
}

pub async fn categories(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<Vec<CategoryRow>>, ApiError> {
    let record = dashboard::current_snapshot(state.store()?, &user).await?;
    Ok(Json(dashboard::category_rows(&record.snapshot)))
}
