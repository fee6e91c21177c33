//! 内存实现，供测试和无数据库的本地运行使用。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{Message, MessageStore, ReadReceipt, Room, RoomKind, RoomStore};
use crate::error::AppError;

#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<String, Room>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn insert(&self, room: Room) -> Result<Room, AppError> {
        let mut rooms = self.rooms.write().await;
        rooms.insert(room.room_id.clone(), room.clone());
        Ok(room)
    }

    async fn find_by_id(&self, room_id: &str) -> Result<Option<Room>, AppError> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(room_id).cloned())
    }

    async fn find_direct_between(&self, a: &str, b: &str) -> Result<Option<Room>, AppError> {
        let rooms = self.rooms.read().await;
        Ok(rooms
            .values()
            .find(|r| {
                r.kind == RoomKind::Direct
                    && r.participants.len() == 2
                    && r.is_participant(a)
                    && r.is_participant(b)
            })
            .cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Room>, AppError> {
        let rooms = self.rooms.read().await;
        let mut result: Vec<Room> = rooms
            .values()
            .filter(|r| r.is_active && r.is_participant(user_id))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(result)
    }

    async fn add_participant(&self, room_id: &str, user_id: &str) -> Result<(), AppError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(AppError::room_not_found)?;

        if !room.is_participant(user_id) {
            room.participants.push(user_id.to_string());
            room.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn remove_participant(&self, room_id: &str, user_id: &str) -> Result<(), AppError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(AppError::room_not_found)?;

        if room.is_participant(user_id) {
            // 参与者集合永不为空
            if room.participants.len() == 1 {
                return Err(AppError::Validation(
                    "不能移除房间的最后一个参与者".into(),
                ));
            }
            room.participants.retain(|p| p != user_id);
            // 保持 admins ⊆ participants
            room.admins.retain(|a| a != user_id);
            room.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn touch_last_message(&self, room_id: &str, message_id: &str) -> Result<(), AppError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(AppError::room_not_found)?;

        room.last_message_id = Some(message_id.to_string());
        room.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: Message) -> Result<Message, AppError> {
        let mut messages = self.messages.write().await;
        messages.push(message.clone());
        Ok(message)
    }

    async fn find_by_id(&self, message_id: &str) -> Result<Option<Message>, AppError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().find(|m| m.message_id == message_id).cloned())
    }

    async fn list_for_room(
        &self,
        room_id: &str,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, AppError> {
        let messages = self.messages.read().await;
        // 与数据库路径一致：按时间倒序取出一页，再反转为升序
        let mut page: Vec<Message> = messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .filter(|m| before.is_none_or(|b| m.created_at < b))
            .cloned()
            .collect();
        page.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        page.truncate(limit.max(0) as usize);
        page.reverse();
        Ok(page)
    }

    async fn mark_read(&self, room_id: &str, user_id: &str) -> Result<u64, AppError> {
        let mut messages = self.messages.write().await;
        let now = Utc::now();
        let mut marked = 0;
        for message in messages
            .iter_mut()
            .filter(|m| m.room_id == room_id && !m.read_by_user(user_id))
        {
            message.read_by.push(ReadReceipt {
                user_id: user_id.to_string(),
                read_at: now,
            });
            marked += 1;
        }
        Ok(marked)
    }
}
