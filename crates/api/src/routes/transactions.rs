use crate::app::AppState;
use crate::error::ApiError;
use crate::extract::CallerId;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use finverse_core::domain::snapshot::Snapshot;
use finverse_core::ledger::{self, Mutation, NewTransaction, TransactionRow, TransactionUpdate};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct TransactionList {
    transactions: Vec<TransactionRow>,
    count: usize,
}

#[derive(Debug, Serialize)]
pub struct CategoryList {
    categories: Vec<String>,
    count: usize,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    deleted: String,
    snapshot: Snapshot,
}

pub async fn list(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<TransactionList>, ApiError> {
    let transactions = ledger::list_transactions(state.store()?, &user).await?;
    Ok(Json(TransactionList {
        count: transactions.len(),
        transactions,
    }))
}

pub async fn add(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    payload: Result<Json<NewTransaction>, JsonRejection>,
) -> Result<(StatusCode, Json<Mutation>), ApiError> {
    let Json(input) = payload?;
    let mutation = ledger::add_transaction(state.store()?, &user, input, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(mutation)))
}

pub async fn edit(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    Path(id): Path<String>,
    payload: Result<Json<TransactionUpdate>, JsonRejection>,
) -> Result<Json<Mutation>, ApiError> {
    let Json(update) = payload?;
    Ok(Json(
        ledger::edit_transaction(state.store()?, &user, &id, update).await?,
    ))
}

pub async fn delete(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    Path(id): Path<String>,
) -> Result<Json<Deleted>, ApiError> {
    let snapshot = ledger::delete_transaction(state.store()?, &user, &id).await?;
    Ok(Json(Deleted {
        deleted: id,
        snapshot,
    }))
}

pub async fn categories(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<CategoryList>, ApiError> {
    let categories = ledger::list_categories(state.store()?, &user).await?;
    Ok(Json(CategoryList {
        count: categories.len(),
        categories,
    }))
}
