//! 客户端错误类型
//!
//! 六类错误贯穿整条调用链：进程、超时、解析、API、会话、配置；
//! 存储边界另有 StoreError，经 #[from] 汇入。所有错误向上冒泡，不做静默吞没。

use thiserror::Error;

/// 超时种类：缓冲模式为绝对超时（限总时长），流式模式为空闲超时（限静默窗口）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Absolute,
    Idle,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Absolute => write!(f, "absolute"),
            TimeoutKind::Idle => write!(f, "idle"),
        }
    }
}

/// 驱动外部 CLI 过程中可能出现的错误
#[derive(Error, Debug)]
pub enum ClientError {
    /// 进程级失败：无法启动、I/O 中断，或缓冲非结构化模式下非零退出
    #[error("Process error: {message}")]
    Process {
        message: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{kind} timeout after {elapsed_ms}ms")]
    Timeout { kind: TimeoutKind, elapsed_ms: u64 },

    /// 流中某行不是合法协议消息；携带原始文本便于定位
    #[error("Parse error: {message}")]
    Parse { message: String, line: String },

    /// 程序正常跑完但通过 is_error 上报逻辑失败；携带结构化载荷
    #[error("API error: {message}")]
    Api {
        message: String,
        payload: serde_json::Value,
    },

    #[error("Session error: {0}")]
    Session(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ClientError {
    /// 不带 stderr / 退出码的进程错误（spawn 失败、管道中断等）
    pub fn process(message: impl Into<String>) -> Self {
        ClientError::Process {
            message: message.into(),
            exit_code: None,
            stderr: String::new(),
        }
    }
}

/// 会话存储边界错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display_carries_kind() {
        let e = ClientError::Timeout {
            kind: TimeoutKind::Idle,
            elapsed_ms: 1500,
        };
        assert_eq!(e.to_string(), "idle timeout after 1500ms");
    }

    #[test]
    fn store_error_converts() {
        let e: ClientError = StoreError::UnknownSession("s1".into()).into();
        assert!(matches!(e, ClientError::Store(_)));
    }
}
