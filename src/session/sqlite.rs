//! SQLite 会话存储
//!
//! 使用 sqlx 的异步 SQLite：建表于打开时，时间戳存 RFC3339 字符串，
//! 导入走事务保证全有或全无，删除在同一事务内级联清掉轮次与原始消息。

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::core::StoreError;
use crate::protocol::StreamMessage;
use crate::session::{ConversationTurn, Role, SessionData, SessionMetadata, SessionStore, StoreStats};

/// SQLite 会话存储
pub struct SqliteSessionStore {
    pool: SqlitePool,
    /// 测试注入点：元数据写入后、轮次写入前强制失败，用于验证导入原子性
    #[cfg(test)]
    fail_import_after_metadata: std::sync::atomic::AtomicBool,
}

impl SqliteSessionStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self {
            pool,
            #[cfg(test)]
            fail_import_after_metadata: std::sync::atomic::AtomicBool::new(false),
        };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                last_active_at TEXT NOT NULL,
                turn_count INTEGER NOT NULL,
                total_cost_usd REAL NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS raw_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_raw_messages_session ON raw_messages(session_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| StoreError::InvalidTimestamp(raw.to_string()))
    }

    fn row_to_metadata(row: &sqlx::sqlite::SqliteRow) -> Result<SessionMetadata, StoreError> {
        let created_at: String = row.get("created_at");
        let last_active_at: String = row.get("last_active_at");
        let turn_count: i64 = row.get("turn_count");
        Ok(SessionMetadata {
            id: row.get("id"),
            created_at: Self::parse_timestamp(&created_at)?,
            last_active_at: Self::parse_timestamp(&last_active_at)?,
            turn_count: turn_count.max(0) as u64,
            total_cost_usd: row.get("total_cost_usd"),
        })
    }

    async fn insert_turn_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        session_id: &str,
        turn: &ConversationTurn,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO turns (session_id, role, content, created_at) VALUES (?, ?, ?, ?)")
            .bind(session_id)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .bind(turn.timestamp.to_rfc3339())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    fn upsert_query(meta: &SessionMetadata) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
        sqlx::query(
            "INSERT INTO sessions (id, created_at, last_active_at, turn_count, total_cost_usd)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                last_active_at = excluded.last_active_at,
                turn_count = excluded.turn_count,
                total_cost_usd = excluded.total_cost_usd",
        )
        .bind(&meta.id)
        .bind(meta.created_at.to_rfc3339())
        .bind(meta.last_active_at.to_rfc3339())
        .bind(meta.turn_count as i64)
        .bind(meta.total_cost_usd)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn upsert_session(&self, meta: &SessionMetadata) -> Result<(), StoreError> {
        Self::upsert_query(meta).execute(&self.pool).await?;
        Ok(())
    }

    async fn add_turn(&self, session_id: &str, turn: &ConversationTurn) -> Result<(), StoreError> {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;
        if exists == 0 {
            return Err(StoreError::UnknownSession(session_id.to_string()));
        }
        sqlx::query("INSERT INTO turns (session_id, role, content, created_at) VALUES (?, ?, ?, ?)")
            .bind(session_id)
            .bind(turn.role.as_str())
            .bind(&turn.content)
            .bind(turn.timestamp.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_raw_message(
        &self,
        session_id: &str,
        message: &StreamMessage,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(message)?;
        sqlx::query("INSERT INTO raw_messages (session_id, payload, created_at) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(payload)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionMetadata>, StoreError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_metadata).transpose()
    }

    async fn get_history(&self, session_id: &str) -> Result<Vec<ConversationTurn>, StoreError> {
        let rows = sqlx::query(
            "SELECT role, content, created_at FROM turns WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in rows {
            let role_str: String = row.get("role");
            let role = match role_str.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                _ => continue,
            };
            let created_at: String = row.get("created_at");
            turns.push(ConversationTurn {
                role,
                content: row.get("content"),
                timestamp: Self::parse_timestamp(&created_at)?,
            });
        }
        Ok(turns)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMetadata>, StoreError> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY last_active_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_metadata).collect()
    }

    async fn get_session_data(&self, session_id: &str) -> Result<Option<SessionData>, StoreError> {
        let Some(metadata) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        let history = self.get_history(session_id).await?;
        Ok(Some(SessionData { metadata, history }))
    }

    async fn import_session_data(&self, data: &SessionData) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = &data.metadata.id;

        // 整体替换：旧轮次先清掉，避免导入叠加出重复历史
        sqlx::query("DELETE FROM turns WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        Self::upsert_query(&data.metadata).execute(&mut *tx).await?;

        #[cfg(test)]
        if self
            .fail_import_after_metadata
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            // 事务随 drop 回滚
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "injected import failure".into(),
            )));
        }

        for turn in &data.history {
            Self::insert_turn_tx(&mut tx, id, turn).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM raw_messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM turns WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS sessions, COALESCE(SUM(total_cost_usd), 0.0) AS cost FROM sessions",
        )
        .fetch_one(&self.pool)
        .await?;
        let sessions: i64 = row.get("sessions");
        let total_cost_usd: f64 = row.get("cost");
        let turns: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM turns")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreStats {
            sessions: sessions.max(0) as u64,
            turns: turns.max(0) as u64,
            total_cost_usd,
        })
    }
}
