use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// 在线状态服务：用户ID → 当前连接ID。
/// 作为可注入的接口而不是全局可变状态，多实例部署时可以
/// 换成共享存储的实现而不用改动调用方。
#[async_trait]
pub trait PresenceService: Send + Sync {
    /// 记录用户的当前连接，覆盖旧条目（每个用户只保留一条）
    async fn register(&self, user_id: &str, conn_id: &str);

    async fn unregister(&self, user_id: &str);

    async fn lookup(&self, user_id: &str) -> Option<String>;
}

/// 进程内实现。进程重启后从零重建，不提供持久性。
#[derive(Default)]
pub struct InMemoryPresence {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceService for InMemoryPresence {
    async fn register(&self, user_id: &str, conn_id: &str) {
        let mut entries = self.entries.write().await;
        entries.insert(user_id.to_string(), conn_id.to_string());
    }

    async fn unregister(&self, user_id: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(user_id);
    }

    async fn lookup(&self, user_id: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.get(user_id).cloned()
    }
}
