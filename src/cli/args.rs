//! 参数构建器：结构化请求 → 命令行参数向量
//!
//! 纯函数，相同输入产生字节级相同的输出（可安全重放/重试）。
//! 非交互标志恒为第一个参数，提示词（若有）恒为最后一个裸位置参数。

use std::path::PathBuf;
use std::time::Duration;

use crate::core::ClientError;

/// 输出格式；Text 为默认，不产生 --output-format 标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    StreamJson,
}

impl OutputFormat {
    pub fn as_flag(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::StreamJson => "stream-json",
        }
    }

    /// 结构化 JSON 模式下，退出码不再是错误判定的唯一依据
    pub fn is_structured(&self) -> bool {
        !matches!(self, OutputFormat::Text)
    }
}

/// 输入格式：仅在显式设置时产生 --input-format 标志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Text,
    StreamJson,
}

impl InputFormat {
    pub fn as_flag(&self) -> &'static str {
        match self {
            InputFormat::Text => "text",
            InputFormat::StreamJson => "stream-json",
        }
    }
}

/// 一次调用的结构化请求
///
/// resume 与 continue_last 互斥：同时给出是调用方错误，构建时校验并拒绝，
/// 绝不静默二选一。
#[derive(Debug, Clone, Default)]
pub struct CliRequest {
    pub output_format: OutputFormat,
    pub input_format: Option<InputFormat>,
    /// 允许的工具名列表；序列化为单个逗号拼接的 --allowedTools
    pub allowed_tools: Vec<String>,
    pub disallowed_tools: Vec<String>,
    pub mcp_config: Option<PathBuf>,
    pub permission_mode: Option<String>,
    pub append_system_prompt: Option<String>,
    pub verbose: bool,
    pub dangerously_skip_permissions: bool,
    /// 会话指令：恢复指定会话
    pub resume: Option<String>,
    /// 会话指令：继续最近一次会话
    pub continue_last: bool,
    /// 超时覆盖；未设置时用客户端默认值
    pub timeout: Option<Duration>,
    pub cwd: Option<PathBuf>,
}

/// 构建参数向量；prompt 为 None 时走 stdin 驱动路径（二者互斥由调用方保证）
pub fn build_args(prompt: Option<&str>, req: &CliRequest) -> Result<Vec<String>, ClientError> {
    if req.resume.is_some() && req.continue_last {
        return Err(ClientError::Config(
            "resume and continue_last are mutually exclusive".to_string(),
        ));
    }

    let mut args = vec!["-p".to_string()];

    if req.output_format != OutputFormat::Text {
        args.push("--output-format".to_string());
        args.push(req.output_format.as_flag().to_string());
    }
    if let Some(input) = req.input_format {
        args.push("--input-format".to_string());
        args.push(input.as_flag().to_string());
    }

    if let Some(id) = &req.resume {
        args.push("--resume".to_string());
        args.push(id.clone());
    } else if req.continue_last {
        args.push("--continue".to_string());
    }

    if !req.allowed_tools.is_empty() {
        args.push("--allowedTools".to_string());
        args.push(req.allowed_tools.join(","));
    }
    if !req.disallowed_tools.is_empty() {
        args.push("--disallowedTools".to_string());
        args.push(req.disallowed_tools.join(","));
    }

    if let Some(path) = &req.mcp_config {
        args.push("--mcp-config".to_string());
        args.push(path.display().to_string());
    }
    if let Some(mode) = &req.permission_mode {
        args.push("--permission-mode".to_string());
        args.push(mode.clone());
    }
    if let Some(suffix) = &req.append_system_prompt {
        args.push("--append-system-prompt".to_string());
        args.push(suffix.clone());
    }
    if req.verbose {
        args.push("--verbose".to_string());
    }
    if req.dangerously_skip_permissions {
        args.push("--dangerously-skip-permissions".to_string());
    }

    if let Some(p) = prompt {
        args.push(p.to_string());
    }

    Ok(args)
}
