use axum::{
    extract::{Extension, Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::model::{CreateRoomRequest, RoomInfo};
use crate::AppState;
use crate::error::AppError;
use crate::utils::{Claims, success_to_api_response};

#[axum::debug_handler]
pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (room, created) = RoomInfo::create(state.rooms.as_ref(), req, &claims.sub).await?;

    // 已存在的私聊幂等返回 200，新建返回 201
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let info = RoomInfo::from_room(state.directory.as_ref(), room, None).await;
    Ok((status, success_to_api_response(info)))
}

#[axum::debug_handler]
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let rooms = RoomInfo::list_for(
        state.rooms.as_ref(),
        state.messages.as_ref(),
        state.directory.as_ref(),
        &claims.sub,
    )
    .await?;
    Ok((StatusCode::OK, success_to_api_response(rooms)))
}
