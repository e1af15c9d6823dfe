use crate::app::AppState;
use crate::error::ApiError;
use crate::extract::CallerId;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use finverse_core::chat::{self, ChatReply, ChatRequest};
use finverse_core::domain::chat::ChatTurn;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
}

pub async fn ask(
    State(state): State<AppState>,
    CallerId(user): CallerId,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload?;
    let reply = chat::answer(
        state.store()?,
        state.llm()?,
        &user,
        request,
        state.chat_timeout,
        Utc::now(),
    )
    .await?;
    Ok(Json(reply))
}

pub async fn history(
    State(state): State<AppState>,
    CallerId(user): CallerId,
) -> Result<Json<ChatHistory>, ApiError> {
    let turns = chat::chat_history(state.store()?, &user).await?;
    Ok(Json(ChatHistory { turns }))
}
