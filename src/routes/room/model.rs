use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::routes::message::model::MessageInfo;
use crate::store::{MessageStore, ParticipantProfile, Room, RoomKind, RoomStore, UserDirectory};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    #[serde(default)]
    pub participant_ids: Vec<String>,
    pub district_id: Option<String>,
    pub event_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub participants: Vec<ParticipantProfile>,
    pub admins: Vec<String>,
    pub district_id: Option<String>,
    pub event_id: Option<String>,
    pub last_message: Option<MessageInfo>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoomInfo {
    /// 参与者ID通过用户目录解析成展示信息
    pub async fn from_room(
        directory: &dyn UserDirectory,
        room: Room,
        last_message: Option<MessageInfo>,
    ) -> Self {
        let participants = directory.profiles(&room.participants).await;
        Self {
            room_id: room.room_id,
            name: room.name,
            kind: room.kind,
            participants,
            admins: room.admins,
            district_id: room.district_id,
            event_id: room.event_id,
            last_message,
            is_active: room.is_active,
            created_by: room.created_by,
            created_at: room.created_at,
            updated_at: room.updated_at,
        }
    }

    /// 创建房间。私聊校验参与者数量并做去重查找：已有的私聊直接返回。
    /// 返回值第二项表示房间是否为新建。
    pub async fn create(
        rooms: &dyn RoomStore,
        req: CreateRoomRequest,
        creator_id: &str,
    ) -> Result<(Room, bool), AppError> {
        if req.kind == RoomKind::Direct {
            if req.participant_ids.len() != 1 {
                return Err(AppError::Validation(
                    "私聊需要且仅需要一个其他参与者".into(),
                ));
            }
            let other = &req.participant_ids[0];
            if other == creator_id {
                return Err(AppError::Validation("不能与自己建立私聊".into()));
            }

            // 读取-写入之间存在竞态，并发重复创建是已接受的低危情形
            if let Some(existing) = rooms.find_direct_between(creator_id, other).await? {
                return Ok((existing, false));
            }
        }

        let mut participants: Vec<String> = Vec::new();
        for id in &req.participant_ids {
            if !participants.iter().any(|p| p == id) {
                participants.push(id.clone());
            }
        }
        if !participants.iter().any(|p| p == creator_id) {
            participants.push(creator_id.to_string());
        }

        let now = Utc::now();
        let room = Room {
            room_id: Uuid::new_v4().to_string(),
            name: req.name,
            kind: req.kind,
            participants,
            admins: vec![creator_id.to_string()],
            district_id: req.district_id,
            event_id: req.event_id,
            last_message_id: None,
            is_active: true,
            created_by: creator_id.to_string(),
            created_at: now,
            updated_at: now,
        };

        let room = rooms.insert(room).await?;
        Ok((room, true))
    }

    /// 用户的活跃房间列表，附带最新消息和参与者展示信息，
    /// 按最近更新排序
    pub async fn list_for(
        rooms: &dyn RoomStore,
        messages: &dyn MessageStore,
        directory: &dyn UserDirectory,
        user_id: &str,
    ) -> Result<Vec<RoomInfo>, AppError> {
        let mut result = Vec::new();
        for room in rooms.list_for_user(user_id).await? {
            let last_message = match &room.last_message_id {
                Some(id) => messages.find_by_id(id).await?.map(MessageInfo::from),
                None => None,
            };
            result.push(RoomInfo::from_room(directory, room, last_message).await);
        }
        Ok(result)
    }
}
