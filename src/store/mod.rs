use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub mod directory;
pub mod memory;
pub mod postgres;

pub use directory::{InMemoryDirectory, ParticipantProfile, UserDirectory};
pub use memory::{MemoryMessageStore, MemoryRoomStore};
pub use postgres::{PgMessageStore, PgRoomStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Direct,
    Group,
    District,
    Event,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Direct => "direct",
            RoomKind::Group => "group",
            RoomKind::District => "district",
            RoomKind::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(RoomKind::Direct),
            "group" => Some(RoomKind::Group),
            "district" => Some(RoomKind::District),
            "event" => Some(RoomKind::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub name: String,
    pub kind: RoomKind,
    pub participants: Vec<String>,
    pub admins: Vec<String>,
    pub district_id: Option<String>,
    pub event_id: Option<String>,
    pub last_message_id: Option<String>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|a| a == user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "file" => Some(MessageKind::File),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(room_id: &str, sender_id: &str, content: String, kind: MessageKind) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            content,
            kind,
            file_url: None,
            file_name: None,
            read_by: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn read_by_user(&self, user_id: &str) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn insert(&self, room: Room) -> Result<Room, AppError>;

    async fn find_by_id(&self, room_id: &str) -> Result<Option<Room>, AppError>;

    /// 查找恰好包含这两个用户的私聊房间
    async fn find_direct_between(&self, a: &str, b: &str) -> Result<Option<Room>, AppError>;

    /// 用户参与的所有活跃房间，按最近更新排序
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Room>, AppError>;

    async fn add_participant(&self, room_id: &str, user_id: &str) -> Result<(), AppError>;

    /// 参与者集合永不为空：移除最后一个参与者是校验错误
    async fn remove_participant(&self, room_id: &str, user_id: &str) -> Result<(), AppError>;

    /// 显式更新最新消息指针和更新时间，不依赖隐式保存钩子
    async fn touch_last_message(&self, room_id: &str, message_id: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: Message) -> Result<Message, AppError>;

    async fn find_by_id(&self, message_id: &str) -> Result<Option<Message>, AppError>;

    /// 返回严格早于 `before` 的最多 `limit` 条消息，按创建时间升序
    async fn list_for_room(
        &self,
        room_id: &str,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, AppError>;

    /// 为房间内所有未读消息追加已读回执，重复调用是幂等的
    async fn mark_read(&self, room_id: &str, user_id: &str) -> Result<u64, AppError>;
}

/// 授权门：先检查房间是否存在，再检查用户是否为参与者。
/// 对加入、发送、读取历史和标记已读统一生效。
pub async fn require_participant(
    rooms: &dyn RoomStore,
    room_id: &str,
    user_id: &str,
) -> Result<Room, AppError> {
    let room = rooms
        .find_by_id(room_id)
        .await?
        .ok_or_else(AppError::room_not_found)?;

    if !room.is_participant(user_id) {
        return Err(AppError::not_participant());
    }

    Ok(room)
}
