//! 实时通道的事件类型。所有负载在通道边界反序列化成显式的
//! 带标签类型，再分发给各个处理函数。

use serde::{Deserialize, Serialize};

use crate::routes::message::model::MessageInfo;

/// 客户端 → 服务端
#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinRoom { room_id: String },
    LeaveRoom { room_id: String },
    SendMessage { room_id: String, content: String },
    GetMessages { room_id: String },
    TypingStart { room_id: String },
    TypingEnd { room_id: String },
}

/// 服务端 → 客户端
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// 广播给房间内所有已加入的连接
    ReceiveMessage {
        message: MessageInfo,
        user_name: String,
    },
    /// 发给在线但未加入该房间广播组的参与者
    NewMessageNotification {
        room_id: String,
        message: MessageInfo,
    },
    /// `get_messages` 的一次性应答，只发给请求方连接
    MessageHistory {
        room_id: String,
        messages: Vec<MessageInfo>,
    },
    UserTyping {
        user_id: String,
        user_name: String,
    },
    UserStoppedTyping {
        user_id: String,
    },
    Error {
        message: String,
    },
}
