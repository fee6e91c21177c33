use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::store::{
    Message, MessageKind, MessageStore, ReadReceipt, Room, RoomStore, require_participant,
};

/// `limit` 未指定时的默认页大小
pub const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(rename = "type")]
    pub kind: Option<MessageKind>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptInfo {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

impl From<ReadReceipt> for ReadReceiptInfo {
    fn from(receipt: ReadReceipt) -> Self {
        Self {
            user_id: receipt.user_id,
            read_at: receipt.read_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    pub message_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub read_by: Vec<ReadReceiptInfo>,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageInfo {
    fn from(message: Message) -> Self {
        Self {
            message_id: message.message_id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            content: message.content,
            kind: message.kind,
            file_url: message.file_url,
            file_name: message.file_name,
            read_by: message.read_by.into_iter().map(ReadReceiptInfo::from).collect(),
            created_at: message.created_at,
        }
    }
}

impl MessageInfo {
    /// 发送消息：先授权，再持久化，最后尽力更新房间的最新消息指针。
    /// 指针更新失败只影响房间列表的排序和预览，不影响消息本身。
    pub async fn send(
        rooms: &dyn RoomStore,
        messages: &dyn MessageStore,
        room_id: &str,
        sender_id: &str,
        req: SendMessageRequest,
    ) -> Result<(Room, Message), AppError> {
        let room = require_participant(rooms, room_id, sender_id).await?;

        let mut message = Message::new(
            room_id,
            sender_id,
            req.content,
            req.kind.unwrap_or(MessageKind::Text),
        );
        message.file_url = req.file_url;
        message.file_name = req.file_name;

        let message = messages.insert(message).await?;

        if let Err(e) = rooms.touch_last_message(room_id, &message.message_id).await {
            tracing::warn!(
                "Failed to update last-message pointer for room {}: {}",
                room_id,
                e
            );
        }

        Ok((room, message))
    }

    /// 消息历史：最多 `limit` 条早于 `before` 的消息，升序返回
    pub async fn history(
        rooms: &dyn RoomStore,
        messages: &dyn MessageStore,
        room_id: &str,
        user_id: &str,
        limit: Option<i64>,
        before: Option<DateTime<Utc>>,
        max_page_size: i64,
    ) -> Result<Vec<MessageInfo>, AppError> {
        require_participant(rooms, room_id, user_id).await?;

        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, max_page_size);
        let page = messages.list_for_room(room_id, limit, before).await?;
        Ok(page.into_iter().map(MessageInfo::from).collect())
    }

    /// 把房间内所有未读消息标记为已读，返回新增回执数量
    pub async fn mark_read(
        rooms: &dyn RoomStore,
        messages: &dyn MessageStore,
        room_id: &str,
        user_id: &str,
    ) -> Result<u64, AppError> {
        require_participant(rooms, room_id, user_id).await?;
        messages.mark_read(room_id, user_id).await
    }
}
