pub mod events;
pub mod handler;
pub mod hub;
pub mod presence;

pub use handler::ws_handler;

use events::ServerEvent;

use crate::AppState;
use crate::routes::message::model::MessageInfo;
use crate::store::Room;

/// 新消息的扇出：先广播给房间组内的连接，再给未加入该组但
/// 在线的参与者单独推送通知（例如正停留在房间列表页的用户）。
pub async fn broadcast_new_message(
    state: &AppState,
    room: &Room,
    message: &MessageInfo,
    sender_name: &str,
) {
    state
        .hub
        .broadcast_room(
            &room.room_id,
            &ServerEvent::ReceiveMessage {
                message: message.clone(),
                user_name: sender_name.to_string(),
            },
            None,
        )
        .await;

    for participant in &room.participants {
        if participant == &message.sender_id {
            continue;
        }
        if let Some(conn_id) = state.presence.lookup(participant).await {
            let delivered = state
                .hub
                .send_to_conn(
                    &conn_id,
                    ServerEvent::NewMessageNotification {
                        room_id: room.room_id.clone(),
                        message: message.clone(),
                    },
                )
                .await;
            if !delivered {
                tracing::debug!(
                    "Notification for {} dropped, connection {} already gone",
                    participant,
                    conn_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::events::{ClientEvent, ServerEvent};
    use super::handler::handle_client_event;
    use super::hub::ChatHub;
    use super::presence::{InMemoryPresence, PresenceService};
    use crate::AppState;
    use crate::config::Config;
    use crate::error::AppError;
    use crate::routes::room::model::{CreateRoomRequest, RoomInfo};
    use crate::store::{
        InMemoryDirectory, MemoryMessageStore, MemoryRoomStore, MessageStore as _, RoomKind,
    };
    use crate::utils::Claims;

    fn test_state() -> AppState {
        AppState {
            config: Config {
                database_url: "postgres://localhost/test".into(),
                redis_url: "redis://localhost".into(),
                jwt_secret: "test-secret".into(),
                jwt_expiration_secs: 3600,
                rate_limit_window_secs: 60,
                rate_limit_requests: 100,
                server_host: "::".into(),
                server_port: 3000,
                api_base_uri: "/api".into(),
                max_page_size: 100,
            },
            rooms: Arc::new(MemoryRoomStore::new()),
            messages: Arc::new(MemoryMessageStore::new()),
            directory: Arc::new(InMemoryDirectory::new()),
            presence: Arc::new(InMemoryPresence::new()),
            hub: Arc::new(ChatHub::new()),
        }
    }

    fn claims(user_id: &str) -> Claims {
        Claims {
            sub: user_id.to_string(),
            name: user_id.to_uppercase(),
            exp: 0,
            iat: 0,
        }
    }

    async fn connect(state: &AppState, user_id: &str) -> (String, UnboundedReceiver<ServerEvent>) {
        let conn_id = format!("conn-{user_id}");
        let (tx, rx) = mpsc::unbounded_channel();
        state.hub.register_conn(&conn_id, tx).await;
        state.presence.register(user_id, &conn_id).await;
        (conn_id, rx)
    }

    async fn group_room(state: &AppState, creator: &str, others: &[&str]) -> String {
        let req = CreateRoomRequest {
            name: "Haustürwahlkampf".into(),
            kind: RoomKind::Group,
            participant_ids: others.iter().map(|p| p.to_string()).collect(),
            district_id: None,
            event_id: None,
        };
        RoomInfo::create(state.rooms.as_ref(), req, creator)
            .await
            .unwrap()
            .0
            .room_id
    }

    #[tokio::test]
    async fn join_is_gated_by_participation() {
        let state = test_state();
        let room_id = group_room(&state, "a", &["b"]).await;
        let (conn, _rx) = connect(&state, "mallory").await;

        let err = handle_client_event(
            &state,
            &conn,
            &claims("mallory"),
            ClientEvent::JoinRoom { room_id },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn join_unknown_room_is_not_found() {
        let state = test_state();
        let (conn, _rx) = connect(&state, "a").await;

        let err = handle_client_event(
            &state,
            &conn,
            &claims("a"),
            ClientEvent::JoinRoom {
                room_id: "missing".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn send_message_broadcasts_and_notifies_absent_participants() {
        let state = test_state();
        let room_id = group_room(&state, "a", &["b", "c"]).await;

        let (conn_a, mut rx_a) = connect(&state, "a").await;
        let (conn_b, mut rx_b) = connect(&state, "b").await;
        // c 在线但没有加入房间组
        let (_conn_c, mut rx_c) = connect(&state, "c").await;

        for (conn, user) in [(&conn_a, "a"), (&conn_b, "b")] {
            handle_client_event(
                &state,
                conn,
                &claims(user),
                ClientEvent::JoinRoom {
                    room_id: room_id.clone(),
                },
            )
            .await
            .unwrap();
        }

        handle_client_event(
            &state,
            &conn_a,
            &claims("a"),
            ClientEvent::SendMessage {
                room_id: room_id.clone(),
                content: "hallo zusammen".into(),
            },
        )
        .await
        .unwrap();

        // 已加入的连接收到广播，发送者自己也在组内
        assert!(matches!(
            rx_a.try_recv(),
            Ok(ServerEvent::ReceiveMessage { .. })
        ));
        match rx_b.try_recv() {
            Ok(ServerEvent::ReceiveMessage { message, user_name }) => {
                assert_eq!(message.content, "hallo zusammen");
                assert_eq!(user_name, "A");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // b 同时在线，额外收到一条通知
        assert!(matches!(
            rx_b.try_recv(),
            Ok(ServerEvent::NewMessageNotification { .. })
        ));
        // c 未加入房间组，只收到通知
        match rx_c.try_recv() {
            Ok(ServerEvent::NewMessageNotification { room_id: id, .. }) => {
                assert_eq!(id, room_id)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_c.try_recv().is_err());
        // 发送者不会收到自己的通知
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_by_non_participant_emits_nothing() {
        let state = test_state();
        let room_id = group_room(&state, "a", &["b"]).await;

        let (conn_a, mut rx_a) = connect(&state, "a").await;
        handle_client_event(
            &state,
            &conn_a,
            &claims("a"),
            ClientEvent::JoinRoom {
                room_id: room_id.clone(),
            },
        )
        .await
        .unwrap();

        let (conn_m, _rx_m) = connect(&state, "mallory").await;
        let err = handle_client_event(
            &state,
            &conn_m,
            &claims("mallory"),
            ClientEvent::SendMessage {
                room_id: room_id.clone(),
                content: "hi".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        assert!(rx_a.try_recv().is_err());
        let history = state
            .messages
            .list_for_room(&room_id, 50, None)
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn get_messages_replies_only_to_requester() {
        let state = test_state();
        let room_id = group_room(&state, "a", &["b"]).await;

        let (conn_a, mut rx_a) = connect(&state, "a").await;
        let (conn_b, mut rx_b) = connect(&state, "b").await;
        for (conn, user) in [(&conn_a, "a"), (&conn_b, "b")] {
            handle_client_event(
                &state,
                conn,
                &claims(user),
                ClientEvent::JoinRoom {
                    room_id: room_id.clone(),
                },
            )
            .await
            .unwrap();
        }

        handle_client_event(
            &state,
            &conn_a,
            &claims("a"),
            ClientEvent::SendMessage {
                room_id: room_id.clone(),
                content: "hallo".into(),
            },
        )
        .await
        .unwrap();
        // 清空发送产生的事件
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        handle_client_event(
            &state,
            &conn_b,
            &claims("b"),
            ClientEvent::GetMessages {
                room_id: room_id.clone(),
            },
        )
        .await
        .unwrap();

        match rx_b.try_recv() {
            Ok(ServerEvent::MessageHistory { messages, .. }) => {
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].content, "hallo");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_is_relayed_without_the_sender() {
        let state = test_state();
        let room_id = group_room(&state, "a", &["b"]).await;

        let (conn_a, mut rx_a) = connect(&state, "a").await;
        let (conn_b, mut rx_b) = connect(&state, "b").await;
        for (conn, user) in [(&conn_a, "a"), (&conn_b, "b")] {
            handle_client_event(
                &state,
                conn,
                &claims(user),
                ClientEvent::JoinRoom {
                    room_id: room_id.clone(),
                },
            )
            .await
            .unwrap();
        }

        handle_client_event(
            &state,
            &conn_a,
            &claims("a"),
            ClientEvent::TypingStart {
                room_id: room_id.clone(),
            },
        )
        .await
        .unwrap();
        handle_client_event(
            &state,
            &conn_a,
            &claims("a"),
            ClientEvent::TypingEnd {
                room_id: room_id.clone(),
            },
        )
        .await
        .unwrap();

        assert!(matches!(rx_b.try_recv(), Ok(ServerEvent::UserTyping { .. })));
        assert!(matches!(
            rx_b.try_recv(),
            Ok(ServerEvent::UserStoppedTyping { .. })
        ));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_room_stops_broadcasts() {
        let state = test_state();
        let room_id = group_room(&state, "a", &["b"]).await;

        let (conn_a, _rx_a) = connect(&state, "a").await;
        let (conn_b, mut rx_b) = connect(&state, "b").await;
        for (conn, user) in [(&conn_a, "a"), (&conn_b, "b")] {
            handle_client_event(
                &state,
                conn,
                &claims(user),
                ClientEvent::JoinRoom {
                    room_id: room_id.clone(),
                },
            )
            .await
            .unwrap();
        }

        handle_client_event(
            &state,
            &conn_b,
            &claims("b"),
            ClientEvent::LeaveRoom {
                room_id: room_id.clone(),
            },
        )
        .await
        .unwrap();

        handle_client_event(
            &state,
            &conn_a,
            &claims("a"),
            ClientEvent::TypingStart {
                room_id: room_id.clone(),
            },
        )
        .await
        .unwrap();
        assert!(rx_b.try_recv().is_err());
    }
}
