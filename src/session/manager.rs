//! 会话连续性管理
//!
//! 会话由外部程序铸造的不透明 ID 标识，跨独立进程调用延续：每次交换把
//! ID 通过 --resume 往返带回。状态机：New / Resumed / Continuing 三个入口
//! 在首个带 ID 的响应后收敛到 Active。轮次与费用元数据只增不减，始终
//! 以服务端最新上报的总量为准。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cli::{CliRequest, OutputFormat, Response};
use crate::client::HeadlessClient;
use crate::core::ClientError;

/// 对话角色（与线上协议一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// 单轮对话；按时间戳排序，只追加
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 会话元数据；turn_count 与 total_cost_usd 对同一 id 单调不减
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub turn_count: u64,
    pub total_cost_usd: f64,
}

impl SessionMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_active_at: now,
            turn_count: 0,
            total_cost_usd: 0.0,
        }
    }

    /// 吸收服务端最新上报的总量：只替换、不回退
    pub fn absorb_usage(&mut self, num_turns: u64, total_cost_usd: f64) {
        self.turn_count = self.turn_count.max(num_turns);
        if total_cost_usd > self.total_cost_usd {
            self.total_cost_usd = total_cost_usd;
        }
        self.last_active_at = Utc::now();
    }
}

/// 导出/导入单元；导出后归调用方所有，与原会话对象再无关联
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub metadata: SessionMetadata,
    pub history: Vec<ConversationTurn>,
}

/// 会话状态机
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// 尚无服务端会话
    New,
    /// 以已知 ID 恢复，待响应确认
    Resumed(String),
    /// 继续最近一次会话，待响应揭示 ID
    Continuing,
    /// 已确认 ID，后续交换均 --resume 该 ID
    Active(String),
}

/// 会话句柄：显式传值，不做进程级「最近会话」隐式状态
pub struct SessionHandle {
    client: HeadlessClient,
    state: SessionState,
    metadata: Option<SessionMetadata>,
    history: Vec<ConversationTurn>,
}

impl SessionHandle {
    pub(crate) fn new(client: HeadlessClient, state: SessionState) -> Self {
        Self {
            client,
            state,
            metadata: None,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// 已确认的会话 ID（Active / Resumed 状态下可用）
    pub fn session_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Active(id) | SessionState::Resumed(id) => Some(id),
            _ => None,
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    /// 执行一次交换：派发前记用户轮，成功后记助手轮并吸收元数据
    ///
    /// 会话指令由状态机决定，调用方请求里的 resume/continue 字段被覆盖；
    /// 输出格式强制为结构化 JSON（连续性依赖响应携带会话 ID）。
    pub async fn send(&mut self, prompt: &str, opts: &CliRequest) -> Result<Response, ClientError> {
        let mut req = opts.clone();
        req.output_format = OutputFormat::Json;
        req.resume = None;
        req.continue_last = false;
        match &self.state {
            SessionState::New => {}
            SessionState::Resumed(id) | SessionState::Active(id) => {
                req.resume = Some(id.clone());
            }
            SessionState::Continuing => req.continue_last = true,
        }

        self.history.push(ConversationTurn::user(prompt));
        let response = self.client.query(prompt, &req).await?;
        self.absorb(&response)?;
        Ok(response)
    }

    /// 从成功响应吸收会话 ID、助手轮与用量；入口状态在此收敛到 Active
    fn absorb(&mut self, response: &Response) -> Result<(), ClientError> {
        let session_id = response
            .session_id()
            .ok_or_else(|| ClientError::Session("response carried no session id".to_string()))?
            .to_string();
        let (num_turns, total_cost_usd) = response.usage().unwrap_or((0, 0.0));

        self.history.push(ConversationTurn::assistant(
            response.result_text().unwrap_or_default(),
        ));

        let meta = self
            .metadata
            .get_or_insert_with(|| SessionMetadata::new(session_id.clone()));
        meta.id = session_id.clone();
        meta.absorb_usage(num_turns, total_cost_usd);

        self.state = SessionState::Active(session_id);
        Ok(())
    }

    /// 导出会话；首次交换完成前没有元数据可导，报 Session 错误
    pub fn export(&self) -> Result<SessionData, ClientError> {
        let metadata = self.metadata.clone().ok_or_else(|| {
            ClientError::Session("nothing to export before the first completed exchange".to_string())
        })?;
        Ok(SessionData {
            metadata,
            history: self.history.clone(),
        })
    }

    /// 导入：整体替换 ID、元数据与历史；这是唯一不经交换就播种会话的途径
    pub fn import(&mut self, data: SessionData) {
        self.state = SessionState::Active(data.metadata.id.clone());
        self.metadata = Some(data.metadata);
        self.history = data.history;
    }

    /// 重置回 New
    pub fn clear(&mut self) {
        self.state = SessionState::New;
        self.metadata = None;
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> SessionHandle {
        SessionHandle::new(HeadlessClient::new("/bin/true"), SessionState::New)
    }

    #[test]
    fn export_before_first_exchange_fails() {
        let h = handle();
        assert!(matches!(h.export(), Err(ClientError::Session(_))));
    }

    #[test]
    fn import_replaces_state_wholesale() {
        let mut h = handle();
        let data = SessionData {
            metadata: SessionMetadata::new("S7"),
            history: vec![
                ConversationTurn::user("hi"),
                ConversationTurn::assistant("hello"),
            ],
        };
        h.import(data.clone());
        assert_eq!(h.state(), &SessionState::Active("S7".to_string()));
        assert_eq!(h.history().len(), 2);
        assert_eq!(h.export().unwrap(), data);
    }

    #[test]
    fn clear_resets_to_new() {
        let mut h = handle();
        h.import(SessionData {
            metadata: SessionMetadata::new("S1"),
            history: vec![ConversationTurn::user("x")],
        });
        h.clear();
        assert_eq!(h.state(), &SessionState::New);
        assert!(h.history().is_empty());
        assert!(h.export().is_err());
    }

    #[test]
    fn metadata_never_decreases() {
        let mut meta = SessionMetadata::new("S1");
        meta.absorb_usage(5, 0.30);
        assert_eq!(meta.turn_count, 5);
        // 迟到/乱序的较小总量不得回退
        meta.absorb_usage(3, 0.10);
        assert_eq!(meta.turn_count, 5);
        assert!((meta.total_cost_usd - 0.30).abs() < f64::EPSILON);
        meta.absorb_usage(7, 0.55);
        assert_eq!(meta.turn_count, 7);
    }

    #[test]
    fn exported_data_is_detached_from_handle() {
        let mut h = handle();
        h.import(SessionData {
            metadata: SessionMetadata::new("S1"),
            history: vec![ConversationTurn::user("a")],
        });
        let exported = h.export().unwrap();
        h.clear();
        // 句柄清空后导出的副本不受影响
        assert_eq!(exported.metadata.id, "S1");
        assert_eq!(exported.history.len(), 1);
    }
}
