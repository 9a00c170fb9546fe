//! 内容块：助手消息中的有序片段
//!
//! 顺序有语义（推理、工具调用、文本交错出现），解析与渲染都必须保序。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 内容块（按 type 判别的闭合和类型）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// 普通文本
    Text { text: String },
    /// 工具调用请求
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// 工具调用结果（回传给模型）
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// 推理片段
    Thinking { thinking: String },
    /// 图片（source 结构由外部程序定义，此处原样保留）
    Image { source: Value },
}

impl ContentBlock {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// 拼接一段内容中的全部文本块（流式助手消息的文本聚合用）
pub fn collect_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("")
}
