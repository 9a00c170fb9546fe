//! 无头客户端：对外的单发/流式/会话入口
//!
//! 把参数构建、进程执行、解码与归一化串成完整调用链。客户端本身无状态、
//! 可 Clone，可跨任务并发使用；每次调用独立派生子进程。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::{
    build_args, reconcile, reconcile_messages, CliRequest, ExecOptions, MessageStream,
    OutputFormat, ProcessExecutor, Response,
};
use crate::config::AppConfig;
use crate::core::ClientError;
use crate::session::{SessionHandle, SessionState};

/// 无头客户端
#[derive(Debug, Clone)]
pub struct HeadlessClient {
    executor: Arc<ProcessExecutor>,
    /// 缓冲模式绝对超时
    request_timeout: Duration,
    /// 流式模式空闲超时
    stream_idle_timeout: Duration,
    workspace: Option<PathBuf>,
}

impl HeadlessClient {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            executor: Arc::new(ProcessExecutor::new(program)),
            request_timeout: Duration::from_secs(300),
            stream_idle_timeout: Duration::from_secs(120),
            workspace: None,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            executor: Arc::new(ProcessExecutor::new(&cfg.cli.program)),
            request_timeout: Duration::from_secs(cfg.cli.request_timeout_secs),
            stream_idle_timeout: Duration::from_secs(cfg.cli.stream_idle_timeout_secs),
            workspace: cfg.app.workspace_root.as_ref().map(PathBuf::from),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Duration) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn program(&self) -> &std::path::Path {
        self.executor.program()
    }

    fn exec_options(&self, req: &CliRequest, stdin: Option<String>) -> ExecOptions {
        let default_timeout = if req.output_format == OutputFormat::StreamJson {
            self.stream_idle_timeout
        } else {
            self.request_timeout
        };
        ExecOptions {
            stdin,
            timeout: req.timeout.unwrap_or(default_timeout),
            cwd: req.cwd.clone().or_else(|| self.workspace.clone()),
            ..Default::default()
        }
    }

    /// 单发查询：同步返回归一化响应
    ///
    /// stream-json 格式下内部仍走流式执行（空闲超时语义），消息收齐后再归一化；
    /// 其余格式走缓冲执行（绝对超时语义）。
    pub async fn query(&self, prompt: &str, req: &CliRequest) -> Result<Response, ClientError> {
        let args = build_args(Some(prompt), req)?;
        tracing::debug!(format = req.output_format.as_flag(), "dispatching query");

        if req.output_format == OutputFormat::StreamJson {
            let mut stream = self.open_stream(&args, req, None).await?;
            let mut messages = Vec::new();
            while let Some(item) = stream.next().await {
                messages.push(item?);
            }
            return reconcile_messages(messages, stream.exit_code().unwrap_or(-1));
        }

        let output = self
            .executor
            .execute(&args, self.exec_options(req, None))
            .await?;
        reconcile(output, req.output_format)
    }

    /// stdin 驱动调用：提示词不上命令行，经管道写入后关闭
    ///
    /// 错误裁决与 query 走同一条归一化路径。
    pub async fn call_with_stdin(
        &self,
        payload: &str,
        req: &CliRequest,
    ) -> Result<Response, ClientError> {
        let args = build_args(None, req)?;
        if req.output_format == OutputFormat::StreamJson {
            let mut stream = self
                .open_stream(&args, req, Some(payload.to_string()))
                .await?;
            let mut messages = Vec::new();
            while let Some(item) = stream.next().await {
                messages.push(item?);
            }
            return reconcile_messages(messages, stream.exit_code().unwrap_or(-1));
        }

        let output = self
            .executor
            .execute(&args, self.exec_options(req, Some(payload.to_string())))
            .await?;
        reconcile(output, req.output_format)
    }

    /// 流式查询：逐条吐出协议消息，终结消息抵达或 EOF 后结束
    ///
    /// 输出格式强制为 stream-json。调用方提前放弃时应 close()，
    /// 保证子进程被杀死而不是等析构。
    pub async fn stream(
        &self,
        prompt: &str,
        req: &CliRequest,
    ) -> Result<MessageStream, ClientError> {
        let mut req = req.clone();
        req.output_format = OutputFormat::StreamJson;
        let args = build_args(Some(prompt), &req)?;
        self.open_stream(&args, &req, None).await
    }

    async fn open_stream(
        &self,
        args: &[String],
        req: &CliRequest,
        stdin: Option<String>,
    ) -> Result<MessageStream, ClientError> {
        let chunks = self
            .executor
            .execute_streaming(args, self.exec_options(req, stdin))
            .await?;
        Ok(MessageStream::new(chunks))
    }

    /// 新会话：首个交换后从响应取得服务端铸造的 ID
    pub fn create_session(&self) -> SessionHandle {
        SessionHandle::new(self.clone(), SessionState::New)
    }

    /// 以已知 ID 恢复会话（跨进程调用延续的唯一凭据）
    pub fn resume_session(&self, session_id: impl Into<String>) -> SessionHandle {
        SessionHandle::new(self.clone(), SessionState::Resumed(session_id.into()))
    }

    /// 继续外部程序记录的最近一次会话；实际 ID 由首个响应揭示
    pub fn continue_last_session(&self) -> SessionHandle {
        SessionHandle::new(self.clone(), SessionState::Continuing)
    }
}
