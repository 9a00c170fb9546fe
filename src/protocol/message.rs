//! 流式协议消息：外部 CLI 的 NDJSON 输出
//!
//! 每行一条按 type 判别的消息。完整的流恰好含一条终结消息（result 或 error），
//! 其后不再有任何消息。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ContentBlock;

/// 终结消息载荷：一次交换的汇总（会话 ID、轮数、费用、时长）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub num_turns: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub duration_api_ms: u64,
    /// 最终文本；is_error 时为错误描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// 流式协议消息（闭合和类型，未知 type 视为解码错误）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// 初始化：交换开始，通常携带会话 ID
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// 用户侧消息（工具结果回传等）
    User { content: Value },
    /// 助手消息：有序内容块
    Assistant { content: Vec<ContentBlock> },
    /// 终结：结果汇总
    Result(ResultPayload),
    /// 终结：协议层错误
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl StreamMessage {
    /// 是否为终结消息（result / error）
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamMessage::Result(_) | StreamMessage::Error { .. })
    }

    /// 此消息携带的会话 ID（init 与 result 可能有）
    pub fn session_id(&self) -> Option<&str> {
        match self {
            StreamMessage::Init { session_id } => session_id.as_deref(),
            StreamMessage::Result(p) => p.session_id.as_deref(),
            _ => None,
        }
    }

    pub fn as_result(&self) -> Option<&ResultPayload> {
        match self {
            StreamMessage::Result(p) => Some(p),
            _ => None,
        }
    }
}
