//! 线上协议类型：流式消息与内容块（闭合和类型，serde 按 type 判别）

pub mod content;
pub mod message;

pub use content::{collect_text, ContentBlock};
pub use message::{ResultPayload, StreamMessage};
