use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::model::{MessageInfo, SendMessageRequest};
use crate::AppState;
use crate::error::AppError;
use crate::socket;
use crate::utils::{Claims, success_to_api_response};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub before: Option<DateTime<Utc>>,
}

#[axum::debug_handler]
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let messages = MessageInfo::history(
        state.rooms.as_ref(),
        state.messages.as_ref(),
        &room_id,
        &claims.sub,
        query.limit,
        query.before,
        state.config.max_page_size,
    )
    .await?;
    Ok((StatusCode::OK, success_to_api_response(messages)))
}

#[axum::debug_handler]
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (room, message) = MessageInfo::send(
        state.rooms.as_ref(),
        state.messages.as_ref(),
        &room_id,
        &claims.sub,
        req,
    )
    .await?;

    // REST 发送的消息与实时通道发送的走同一条广播路径
    let info = MessageInfo::from(message);
    socket::broadcast_new_message(&state, &room, &info, &claims.name).await;

    Ok((StatusCode::CREATED, success_to_api_response(info)))
}

#[axum::debug_handler]
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let marked = MessageInfo::mark_read(
        state.rooms.as_ref(),
        state.messages.as_ref(),
        &room_id,
        &claims.sub,
    )
    .await?;
    Ok((
        StatusCode::OK,
        success_to_api_response(serde_json::json!({ "marked": marked })),
    ))
}
