use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use super::{Message, MessageKind, MessageStore, ReadReceipt, Room, RoomKind, RoomStore};
use crate::error::AppError;

/// 建表语句，服务启动时执行
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_rooms (
            room_id         TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            kind            TEXT NOT NULL,
            participants    TEXT[] NOT NULL,
            admins          TEXT[] NOT NULL,
            district_id     TEXT,
            event_id        TEXT,
            last_message_id TEXT,
            is_active       BOOLEAN NOT NULL DEFAULT TRUE,
            created_by      TEXT NOT NULL,
            created_at      TIMESTAMPTZ NOT NULL,
            updated_at      TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            message_id TEXT PRIMARY KEY,
            room_id    TEXT NOT NULL,
            sender_id  TEXT NOT NULL,
            content    TEXT NOT NULL,
            kind       TEXT NOT NULL,
            file_url   TEXT,
            file_name  TEXT,
            read_by    JSONB NOT NULL DEFAULT '[]',
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_room_created
         ON chat_messages (room_id, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(FromRow)]
struct RoomRow {
    room_id: String,
    name: String,
    kind: String,
    participants: Vec<String>,
    admins: Vec<String>,
    district_id: Option<String>,
    event_id: Option<String>,
    last_message_id: Option<String>,
    is_active: bool,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoomRow {
    fn into_room(self) -> Result<Room, AppError> {
        let kind = RoomKind::parse(&self.kind)
            .ok_or_else(|| sqlx::Error::Protocol(format!("unknown room kind: {}", self.kind)))?;
        Ok(Room {
            room_id: self.room_id,
            name: self.name,
            kind,
            participants: self.participants,
            admins: self.admins,
            district_id: self.district_id,
            event_id: self.event_id,
            last_message_id: self.last_message_id,
            is_active: self.is_active,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_ROOM: &str = r#"
    SELECT room_id, name, kind, participants, admins, district_id, event_id,
           last_message_id, is_active, created_by, created_at, updated_at
    FROM chat_rooms
"#;

pub struct PgRoomStore {
    pool: PgPool,
}

impl PgRoomStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, room_id: &str) -> Result<bool, AppError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM chat_rooms WHERE room_id = $1)")
                .bind(room_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists.0)
    }
}

#[async_trait]
impl RoomStore for PgRoomStore {
    async fn insert(&self, room: Room) -> Result<Room, AppError> {
        sqlx::query(
            r#"
            INSERT INTO chat_rooms (
                room_id, name, kind, participants, admins, district_id, event_id,
                last_message_id, is_active, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&room.room_id)
        .bind(&room.name)
        .bind(room.kind.as_str())
        .bind(&room.participants)
        .bind(&room.admins)
        .bind(&room.district_id)
        .bind(&room.event_id)
        .bind(&room.last_message_id)
        .bind(room.is_active)
        .bind(&room.created_by)
        .bind(room.created_at)
        .bind(room.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(room)
    }

    async fn find_by_id(&self, room_id: &str) -> Result<Option<Room>, AppError> {
        let row: Option<RoomRow> =
            sqlx::query_as(&format!("{SELECT_ROOM} WHERE room_id = $1"))
                .bind(room_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(RoomRow::into_room).transpose()
    }

    async fn find_direct_between(&self, a: &str, b: &str) -> Result<Option<Room>, AppError> {
        let row: Option<RoomRow> = sqlx::query_as(&format!(
            r#"{SELECT_ROOM}
            WHERE kind = 'direct'
              AND cardinality(participants) = 2
              AND participants @> ARRAY[$1, $2]::text[]
            LIMIT 1"#
        ))
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;
        row.map(RoomRow::into_room).transpose()
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Room>, AppError> {
        let rows: Vec<RoomRow> = sqlx::query_as(&format!(
            "{SELECT_ROOM} WHERE is_active AND $1 = ANY(participants) ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RoomRow::into_room).collect()
    }

    async fn add_participant(&self, room_id: &str, user_id: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_rooms
            SET participants = array_append(participants, $2), updated_at = NOW()
            WHERE room_id = $1 AND NOT ($2 = ANY(participants))
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        // 未更新时区分“已是参与者”与“房间不存在”
        if result.rows_affected() == 0 && !self.exists(room_id).await? {
            return Err(AppError::room_not_found());
        }
        Ok(())
    }

    async fn remove_participant(&self, room_id: &str, user_id: &str) -> Result<(), AppError> {
        // 参与者集合永不为空，最后一个参与者不可移除
        let result = sqlx::query(
            r#"
            UPDATE chat_rooms
            SET participants = array_remove(participants, $2),
                admins = array_remove(admins, $2),
                updated_at = NOW()
            WHERE room_id = $1
              AND $2 = ANY(participants)
              AND cardinality(participants) > 1
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // 区分“房间不存在”“最后一个参与者”与“本就不是参与者”
            let row: Option<(bool,)> = sqlx::query_as(
                r#"
                SELECT cardinality(participants) = 1 AND $2 = ANY(participants)
                FROM chat_rooms WHERE room_id = $1
                "#,
            )
            .bind(room_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                None => return Err(AppError::room_not_found()),
                Some((true,)) => {
                    return Err(AppError::Validation(
                        "不能移除房间的最后一个参与者".into(),
                    ));
                }
                Some((false,)) => {}
            }
        }
        Ok(())
    }

    async fn touch_last_message(&self, room_id: &str, message_id: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE chat_rooms SET last_message_id = $2, updated_at = NOW() WHERE room_id = $1",
        )
        .bind(room_id)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct MessageRow {
    message_id: String,
    room_id: String,
    sender_id: String,
    content: String,
    kind: String,
    file_url: Option<String>,
    file_name: Option<String>,
    read_by: Json<Vec<ReadReceipt>>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, AppError> {
        let kind = MessageKind::parse(&self.kind)
            .ok_or_else(|| sqlx::Error::Protocol(format!("unknown message kind: {}", self.kind)))?;
        Ok(Message {
            message_id: self.message_id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.content,
            kind,
            file_url: self.file_url,
            file_name: self.file_name,
            read_by: self.read_by.0,
            created_at: self.created_at,
        })
    }
}

const SELECT_MESSAGE: &str = r#"
    SELECT message_id, room_id, sender_id, content, kind, file_url, file_name,
           read_by, created_at
    FROM chat_messages
"#;

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: Message) -> Result<Message, AppError> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (
                message_id, room_id, sender_id, content, kind,
                file_url, file_name, read_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&message.message_id)
        .bind(&message.room_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(&message.file_url)
        .bind(&message.file_name)
        .bind(Json(&message.read_by))
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(message)
    }

    async fn find_by_id(&self, message_id: &str) -> Result<Option<Message>, AppError> {
        let row: Option<MessageRow> =
            sqlx::query_as(&format!("{SELECT_MESSAGE} WHERE message_id = $1"))
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(MessageRow::into_message).transpose()
    }

    async fn list_for_room(
        &self,
        room_id: &str,
        limit: i64,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>, AppError> {
        // 倒序分页取出最新一页，再反转为升序返回
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            r#"{SELECT_MESSAGE}
            WHERE room_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2)
            ORDER BY created_at DESC
            LIMIT $3"#
        ))
        .bind(room_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .into_iter()
            .map(MessageRow::into_message)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn mark_read(&self, room_id: &str, user_id: &str) -> Result<u64, AppError> {
        // 仅追加缺失的回执，重复调用不会产生重复条目
        let result = sqlx::query(
            r#"
            UPDATE chat_messages
            SET read_by = read_by
                || jsonb_build_array(jsonb_build_object(
                    'user_id', $2::text,
                    'read_at', to_jsonb(NOW())
                ))
            WHERE room_id = $1
              AND NOT read_by @> jsonb_build_array(jsonb_build_object('user_id', $2::text))
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
