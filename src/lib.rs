//! Drone - Rust 无头智能体客户端
//!
//! 把外部编码代理 CLI 当作无头引擎驱动：每次交换派生一个非交互子进程，
//! 解码其行分隔的流式 JSON 输出，并通过不透明会话 ID 在独立进程调用
//! 之间延续多轮对话。
//!
//! 模块划分：
//! - **cli**: 参数构建、进程执行、流解码、响应归一化
//! - **client**: 无头客户端（单发 / 流式 / 会话入口）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与智能体编排器
//! - **protocol**: 流式协议消息与内容块
//! - **session**: 会话连续性状态机与存储（内存 / SQLite）
//! - **tools**: 工具 ID → 工具面 的解析

pub mod cli;
pub mod client;
pub mod config;
pub mod core;
pub mod protocol;
pub mod session;
pub mod tools;

pub use cli::{CliRequest, InputFormat, MessageStream, OutputFormat, Response};
pub use client::HeadlessClient;
pub use crate::core::{AgentOrchestrator, ClientError, RunOptions, RunOutcome, TimeoutKind};
pub use session::{SessionData, SessionHandle, SessionState};
