use std::collections::{HashMap, HashSet};

use tokio::sync::{RwLock, mpsc};

use super::events::ServerEvent;

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

#[derive(Default)]
struct HubInner {
    /// 连接ID → 该连接的事件发送端
    senders: HashMap<String, EventSender>,
    /// 房间ID → 已加入该房间广播组的连接集合
    rooms: HashMap<String, HashSet<String>>,
}

/// 房间广播组的登记处。一个连接可以同时属于多个房间组。
#[derive(Default)]
pub struct ChatHub {
    inner: RwLock<HubInner>,
}

impl ChatHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_conn(&self, conn_id: &str, sender: EventSender) {
        let mut inner = self.inner.write().await;
        inner.senders.insert(conn_id.to_string(), sender);
    }

    /// 注销连接并隐式退出其所有房间组
    pub async fn unregister_conn(&self, conn_id: &str) {
        let mut inner = self.inner.write().await;
        inner.senders.remove(conn_id);
        for members in inner.rooms.values_mut() {
            members.remove(conn_id);
        }
        inner.rooms.retain(|_, members| !members.is_empty());
    }

    pub async fn join_room(&self, room_id: &str, conn_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    pub async fn leave_room(&self, room_id: &str, conn_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.rooms.get_mut(room_id) {
            members.remove(conn_id);
            if members.is_empty() {
                inner.rooms.remove(room_id);
            }
        }
    }

    /// 广播给房间组内的每个连接。单个接收方失败只记录日志，
    /// 不影响其余接收方。
    pub async fn broadcast_room(&self, room_id: &str, event: &ServerEvent, except: Option<&str>) {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room_id) else {
            return;
        };

        for conn_id in members {
            if except.is_some_and(|skip| skip == conn_id) {
                continue;
            }
            if let Some(sender) = inner.senders.get(conn_id) {
                if sender.send(event.clone()).is_err() {
                    tracing::debug!("Dropped event for stale connection {}", conn_id);
                }
            }
        }
    }

    /// 发给单个连接，返回是否送达
    pub async fn send_to_conn(&self, conn_id: &str, event: ServerEvent) -> bool {
        let inner = self.inner.read().await;
        match inner.senders.get(conn_id) {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::message::model::MessageInfo;
    use crate::store::{Message, MessageKind};
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn conn(hub: &ChatHub, id: &str) -> (String, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register_conn(id, tx).await;
        (id.to_string(), rx)
    }

    fn typing(user: &str) -> ServerEvent {
        ServerEvent::UserTyping {
            user_id: user.into(),
            user_name: user.to_uppercase(),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_joined_connections() {
        let hub = ChatHub::new();
        let (c1, mut rx1) = conn(&hub, "c1").await;
        let (c2, mut rx2) = conn(&hub, "c2").await;
        let (_c3, mut rx3) = conn(&hub, "c3").await;

        hub.join_room("r1", &c1).await;
        hub.join_room("r1", &c2).await;
        // c3 未加入 r1

        hub.broadcast_room("r1", &typing("a"), None).await;

        assert!(matches!(rx1.try_recv(), Ok(ServerEvent::UserTyping { .. })));
        assert!(matches!(rx2.try_recv(), Ok(ServerEvent::UserTyping { .. })));
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_can_exclude_the_sender() {
        let hub = ChatHub::new();
        let (c1, mut rx1) = conn(&hub, "c1").await;
        let (c2, mut rx2) = conn(&hub, "c2").await;

        hub.join_room("r1", &c1).await;
        hub.join_room("r1", &c2).await;

        hub.broadcast_room("r1", &typing("a"), Some(&c1)).await;

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unregister_drops_room_memberships() {
        let hub = ChatHub::new();
        let (c1, mut rx1) = conn(&hub, "c1").await;

        hub.join_room("r1", &c1).await;
        hub.unregister_conn(&c1).await;

        hub.broadcast_room("r1", &typing("a"), None).await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_conn_reports_delivery() {
        let hub = ChatHub::new();
        let (c1, mut rx1) = conn(&hub, "c1").await;

        let message = MessageInfo::from(Message::new("r1", "a", "hallo".into(), MessageKind::Text));
        let delivered = hub
            .send_to_conn(
                &c1,
                ServerEvent::NewMessageNotification {
                    room_id: "r1".into(),
                    message,
                },
            )
            .await;

        assert!(delivered);
        assert!(matches!(
            rx1.try_recv(),
            Ok(ServerEvent::NewMessageNotification { .. })
        ));
        assert!(!hub.send_to_conn("ghost", typing("a")).await);
    }
}
