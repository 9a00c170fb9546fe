//! 会话存储抽象层
//!
//! 定义统一的存储接口，内存与 SQLite 两种实现。对同一会话 ID 的并发写
//! 由实现串行化：元数据后写覆盖，历史追加绝不丢失或重复。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::StoreError;
use crate::protocol::StreamMessage;
use crate::session::{ConversationTurn, SessionData, SessionMetadata};

/// 聚合统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub sessions: u64,
    pub turns: u64,
    pub total_cost_usd: f64,
}

/// 会话存储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 按 id 插入或更新元数据；幂等，不产生重复行
    async fn upsert_session(&self, meta: &SessionMetadata) -> Result<(), StoreError>;

    /// 追加一轮对话
    async fn add_turn(&self, session_id: &str, turn: &ConversationTurn) -> Result<(), StoreError>;

    /// 追加一条原始流消息（流式路径逐条落库）
    async fn add_raw_message(
        &self,
        session_id: &str,
        message: &StreamMessage,
    ) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionMetadata>, StoreError>;

    async fn get_history(&self, session_id: &str) -> Result<Vec<ConversationTurn>, StoreError>;

    /// 按最近活跃倒序
    async fn list_sessions(&self) -> Result<Vec<SessionMetadata>, StoreError>;

    async fn get_session_data(&self, session_id: &str) -> Result<Option<SessionData>, StoreError>;

    /// 原子导入：元数据与全部轮次要么都写入，要么都不写入
    async fn import_session_data(&self, data: &SessionData) -> Result<(), StoreError>;

    /// 删除会话并级联其轮次与原始消息；返回是否存在
    async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

#[derive(Debug, Clone)]
struct MemorySession {
    meta: SessionMetadata,
    turns: Vec<ConversationTurn>,
    raw_messages: Vec<StreamMessage>,
}

/// 内存会话存储（测试与无持久化场景）
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, MemorySession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已落库的原始流消息条数（观测用）
    pub async fn raw_message_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.raw_messages.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn upsert_session(&self, meta: &SessionMetadata) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&meta.id) {
            Some(existing) => {
                // 后写覆盖，created_at 保留首次值
                let created_at = existing.meta.created_at;
                existing.meta = meta.clone();
                existing.meta.created_at = created_at;
            }
            None => {
                sessions.insert(
                    meta.id.clone(),
                    MemorySession {
                        meta: meta.clone(),
                        turns: Vec::new(),
                        raw_messages: Vec::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn add_turn(&self, session_id: &str, turn: &ConversationTurn) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;
        session.turns.push(turn.clone());
        Ok(())
    }

    async fn add_raw_message(
        &self,
        session_id: &str,
        message: &StreamMessage,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))?;
        session.raw_messages.push(message.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionMetadata>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.meta.clone()))
    }

    async fn get_history(&self, session_id: &str) -> Result<Vec<ConversationTurn>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.turns.clone())
            .unwrap_or_default())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMetadata>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<SessionMetadata> = sessions.values().map(|s| s.meta.clone()).collect();
        all.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(all)
    }

    async fn get_session_data(&self, session_id: &str) -> Result<Option<SessionData>, StoreError> {
        Ok(self.sessions.read().await.get(session_id).map(|s| SessionData {
            metadata: s.meta.clone(),
            history: s.turns.clone(),
        }))
    }

    async fn import_session_data(&self, data: &SessionData) -> Result<(), StoreError> {
        // 构建完整后整体换入，天然原子
        let session = MemorySession {
            meta: data.metadata.clone(),
            turns: data.history.clone(),
            raw_messages: Vec::new(),
        };
        self.sessions
            .write()
            .await
            .insert(data.metadata.id.clone(), session);
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(StoreStats {
            sessions: sessions.len() as u64,
            turns: sessions.values().map(|s| s.turns.len() as u64).sum(),
            total_cost_usd: sessions.values().map(|s| s.meta.total_cost_usd).sum(),
        })
    }
}

/// 创建会话存储：给了 db_path 用 SQLite，打不开时告警并回退内存实现
pub async fn create_session_store(db_path: Option<&Path>) -> Arc<dyn SessionStore> {
    if let Some(path) = db_path {
        match super::sqlite::SqliteSessionStore::new(path).await {
            Ok(store) => {
                tracing::info!("Using sqlite session store: {:?}", path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open sqlite store, falling back to memory: {}", e);
            }
        }
    }
    tracing::info!("Using in-memory session store");
    Arc::new(MemorySessionStore::new())
}
