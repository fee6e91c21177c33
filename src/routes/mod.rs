use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;
use crate::middleware::auth_middleware;
use crate::socket;

pub mod message;
pub mod room;

/// 聊天相关路由。REST 接口走认证中间件，WebSocket 握手自带凭证。
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/chat/rooms", post(room::create_room).get(room::list_rooms))
        .route(
            "/chat/rooms/{room_id}/messages",
            get(message::get_messages).post(message::send_message),
        )
        .route("/chat/rooms/{room_id}/read", post(message::mark_read))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let realtime = Router::new().route("/ws", get(socket::ws_handler));

    protected.merge(realtime).with_state(state)
}
