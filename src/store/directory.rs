use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

/// 参与者的展示信息。账户由外部身份服务管理，这里只保存
/// 从已验证凭证里观察到的展示数据。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

/// 用户目录：用户ID → 展示信息。与在线状态一样做成可注入的
/// 接口，换成查询身份服务的实现时不用改动调用方。
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// 记录一次已验证的身份，覆盖旧条目
    async fn record(&self, user_id: &str, display_name: &str);

    /// 批量解析展示信息，未知用户降级为以ID作为展示名
    async fn profiles(&self, user_ids: &[String]) -> Vec<ParticipantProfile>;
}

/// 进程内实现，由认证中间件和实时通道握手喂入凭证里的名称
#[derive(Default)]
pub struct InMemoryDirectory {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn record(&self, user_id: &str, display_name: &str) {
        let mut entries = self.entries.write().await;
        entries.insert(user_id.to_string(), display_name.to_string());
    }

    async fn profiles(&self, user_ids: &[String]) -> Vec<ParticipantProfile> {
        let entries = self.entries.read().await;
        user_ids
            .iter()
            .map(|id| ParticipantProfile {
                user_id: id.clone(),
                display_name: entries.get(id).cloned().unwrap_or_else(|| id.clone()),
                email: None,
            })
            .collect()
    }
}
