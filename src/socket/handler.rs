use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::broadcast_new_message;
use super::events::{ClientEvent, ServerEvent};
use crate::AppState;
use crate::error::AppError;
use crate::routes::message::model::{MessageInfo, SendMessageRequest};
use crate::store::require_participant;
use crate::utils::{Claims, verify_token};

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

#[axum::debug_handler]
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // 握手：凭证无效时先下发认证错误事件，再断开连接
    let claims = match token.as_deref().map(|t| verify_token(t, &state.config)) {
        Some(Ok(claims)) => claims,
        _ => {
            let event = ServerEvent::Error {
                message: AppError::Authentication.to_string(),
            };
            if let Ok(json) = serde_json::to_string(&event) {
                let _ = ws_tx.send(WsMessage::Text(json.into())).await;
            }
            let _ = ws_tx.close().await;
            return;
        }
    };

    let conn_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.hub.register_conn(&conn_id, tx).await;
    // 新连接覆盖同一用户的旧在线条目
    state.presence.register(&claims.sub, &conn_id).await;
    state.directory.record(&claims.sub, &claims.name).await;
    tracing::info!("User connected: {} ({})", claims.sub, conn_id);

    // 服务端事件序列化后转发到 WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                if let Err(e) =
                                    handle_client_event(&state, &conn_id, &claims, event).await
                                {
                                    state
                                        .hub
                                        .send_to_conn(
                                            &conn_id,
                                            ServerEvent::Error { message: e.to_string() },
                                        )
                                        .await;
                                }
                            }
                            Err(e) => {
                                state
                                    .hub
                                    .send_to_conn(
                                        &conn_id,
                                        ServerEvent::Error {
                                            message: format!("无法解析的事件: {e}"),
                                        },
                                    )
                                    .await;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error for {}: {}", conn_id, e);
                        break;
                    }
                }
            }
            _ = &mut send_task => break,
        }
    }

    // 断开：清理在线条目，广播组成员资格随连接一起丢弃。
    // 已经开始的存储操作不会被取消。
    state.presence.unregister(&claims.sub).await;
    state.hub.unregister_conn(&conn_id).await;
    send_task.abort();
    tracing::info!("User disconnected: {} ({})", claims.sub, conn_id);
}

pub async fn handle_client_event(
    state: &AppState,
    conn_id: &str,
    claims: &Claims,
    event: ClientEvent,
) -> Result<(), AppError> {
    match event {
        ClientEvent::JoinRoom { room_id } => {
            require_participant(state.rooms.as_ref(), &room_id, &claims.sub).await?;
            state.hub.join_room(&room_id, conn_id).await;
            tracing::debug!("{} joined room {}", claims.sub, room_id);
            Ok(())
        }
        // 离开总是安全的，不需要授权检查
        ClientEvent::LeaveRoom { room_id } => {
            state.hub.leave_room(&room_id, conn_id).await;
            Ok(())
        }
        ClientEvent::SendMessage { room_id, content } => {
            let req = SendMessageRequest {
                content,
                kind: None,
                file_url: None,
                file_name: None,
            };
            let (room, message) = MessageInfo::send(
                state.rooms.as_ref(),
                state.messages.as_ref(),
                &room_id,
                &claims.sub,
                req,
            )
            .await?;

            let info = MessageInfo::from(message);
            broadcast_new_message(state, &room, &info, &claims.name).await;
            Ok(())
        }
        ClientEvent::GetMessages { room_id } => {
            let messages = MessageInfo::history(
                state.rooms.as_ref(),
                state.messages.as_ref(),
                &room_id,
                &claims.sub,
                None,
                None,
                state.config.max_page_size,
            )
            .await?;

            // 一次性应答，只发给请求方
            state
                .hub
                .send_to_conn(conn_id, ServerEvent::MessageHistory { room_id, messages })
                .await;
            Ok(())
        }
        // 输入提示是尽力而为的信号：不持久化，不做授权检查
        ClientEvent::TypingStart { room_id } => {
            state
                .hub
                .broadcast_room(
                    &room_id,
                    &ServerEvent::UserTyping {
                        user_id: claims.sub.clone(),
                        user_name: claims.name.clone(),
                    },
                    Some(conn_id),
                )
                .await;
            Ok(())
        }
        ClientEvent::TypingEnd { room_id } => {
            state
                .hub
                .broadcast_room(
                    &room_id,
                    &ServerEvent::UserStoppedTyping {
                        user_id: claims.sub.clone(),
                    },
                    Some(conn_id),
                )
                .await;
            Ok(())
        }
    }
}
