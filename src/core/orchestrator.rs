//! 智能体编排器
//!
//! 在客户端之上叠加持久化职责：每次运行解析工具面、派发外部程序、
//! 把会话元数据与对话轮次写入存储。流式运行额外把每条原始协议消息
//! 逐条落库，供回放与审计。

use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::{reconcile_messages, CliRequest, OutputFormat, Response};
use crate::client::HeadlessClient;
use crate::core::ClientError;
use crate::protocol::{collect_text, StreamMessage};
use crate::session::{ConversationTurn, SessionMetadata, SessionStore};
use crate::tools::{StaticToolResolver, ToolResolver};

/// 单次运行的选项
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// 延续已有会话；None 时开新会话
    pub session_id: Option<String>,
    /// 请求级覆盖（输出格式与会话指令字段会被编排器改写）
    pub overrides: CliRequest,
}

/// 单次运行的结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub response: Response,
    /// 本次运行确认的会话 ID，下次以 RunOptions::session_id 传回即可延续
    pub session_id: String,
}

/// 编排器：一个命名智能体 = 客户端 + 工具面 + 存储
pub struct AgentOrchestrator {
    name: String,
    workspace: Option<PathBuf>,
    tool_ids: Vec<String>,
    resolver: Arc<dyn ToolResolver>,
    client: HeadlessClient,
    store: Arc<dyn SessionStore>,
}

impl AgentOrchestrator {
    pub fn new(
        name: impl Into<String>,
        client: HeadlessClient,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            name: name.into(),
            workspace: None,
            tool_ids: Vec::new(),
            resolver: Arc::new(StaticToolResolver::new()),
            client,
            store,
        }
    }

    pub fn with_tools(mut self, tool_ids: Vec<String>) -> Self {
        self.tool_ids = tool_ids;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ToolResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// 按会话指令与工具面组装请求
    async fn prepare_request(
        &self,
        opts: &RunOptions,
        format: OutputFormat,
    ) -> Result<CliRequest, ClientError> {
        let resolved = self.resolver.resolve(&self.tool_ids).await?;
        let mut req = opts.overrides.clone();
        req.output_format = format;
        req.resume = opts.session_id.clone();
        req.continue_last = false;
        req.allowed_tools = resolved.allowed_tool_names;
        if req.mcp_config.is_none() {
            req.mcp_config = resolved.mcp_config_path;
        }
        if req.cwd.is_none() {
            req.cwd = self.workspace.clone();
        }
        Ok(req)
    }

    /// 元数据合并：保留首建时间，用量只增不减
    async fn merged_metadata(
        &self,
        session_id: &str,
        num_turns: u64,
        total_cost_usd: f64,
    ) -> Result<SessionMetadata, ClientError> {
        let mut meta = self
            .store
            .get_session(session_id)
            .await?
            .unwrap_or_else(|| SessionMetadata::new(session_id));
        meta.absorb_usage(num_turns, total_cost_usd);
        Ok(meta)
    }

    async fn persist_exchange(
        &self,
        session_id: &str,
        prompt: &str,
        answer: &str,
        num_turns: u64,
        total_cost_usd: f64,
    ) -> Result<(), ClientError> {
        let meta = self
            .merged_metadata(session_id, num_turns, total_cost_usd)
            .await?;
        self.store.upsert_session(&meta).await?;
        self.store
            .add_turn(session_id, &ConversationTurn::user(prompt))
            .await?;
        self.store
            .add_turn(session_id, &ConversationTurn::assistant(answer))
            .await?;
        Ok(())
    }

    /// 缓冲运行：单 JSON 文档模式，响应落库后返回
    pub async fn run(&self, prompt: &str, opts: &RunOptions) -> Result<RunOutcome, ClientError> {
        let req = self.prepare_request(opts, OutputFormat::Json).await?;
        tracing::info!(agent = %self.name, resumed = opts.session_id.is_some(), "run started");

        let response = self.client.query(prompt, &req).await?;
        let session_id = response
            .session_id()
            .ok_or_else(|| ClientError::Session("response carried no session id".to_string()))?
            .to_string();
        let (num_turns, total_cost_usd) = response.usage().unwrap_or((0, 0.0));

        self.persist_exchange(
            &session_id,
            prompt,
            response.result_text().unwrap_or_default(),
            num_turns,
            total_cost_usd,
        )
        .await?;

        tracing::info!(agent = %self.name, session = %session_id, "run finished");
        Ok(RunOutcome {
            response,
            session_id,
        })
    }

    /// 流式运行：逐条消息落库，终结消息裁决成败
    ///
    /// 会话 ID 在首条 init 消息（或 opts.session_id）揭晓前，原始消息先
    /// 积压在内存；ID 确认后写一条占位元数据行，再把积压冲入存储。
    pub async fn run_stream(
        &self,
        prompt: &str,
        opts: &RunOptions,
    ) -> Result<RunOutcome, ClientError> {
        let req = self.prepare_request(opts, OutputFormat::StreamJson).await?;
        tracing::info!(agent = %self.name, resumed = opts.session_id.is_some(), "streaming run started");

        let mut stream = self.client.stream(prompt, &req).await?;
        let mut session_id = opts.session_id.clone();
        let mut pending_raw: Vec<StreamMessage> = Vec::new();
        let mut messages: Vec<StreamMessage> = Vec::new();
        let mut answer = String::new();

        while let Some(item) = stream.next().await {
            let msg = match item {
                Ok(m) => m,
                Err(e) => return Err(e),
            };

            if session_id.is_none() {
                session_id = msg.session_id().map(str::to_string);
            }

            if let StreamMessage::Assistant { content } = &msg {
                answer.push_str(&collect_text(content));
            }

            match &session_id {
                Some(id) => {
                    if !pending_raw.is_empty() || messages.is_empty() {
                        // 首次确认 ID：先立占位行，满足原始消息的外键前提
                        let meta = self.merged_metadata(id, 0, 0.0).await?;
                        self.store.upsert_session(&meta).await?;
                        for buffered in pending_raw.drain(..) {
                            self.store.add_raw_message(id, &buffered).await?;
                        }
                    }
                    self.store.add_raw_message(id, &msg).await?;
                }
                None => pending_raw.push(msg.clone()),
            }

            messages.push(msg);
        }

        let exit_code = stream.exit_code().unwrap_or(-1);
        let response = reconcile_messages(messages, exit_code)?;

        let session_id = response
            .session_id()
            .map(str::to_string)
            .or(session_id)
            .ok_or_else(|| ClientError::Session("stream carried no session id".to_string()))?;
        let (num_turns, total_cost_usd) = response.usage().unwrap_or((0, 0.0));

        self.persist_exchange(&session_id, prompt, &answer, num_turns, total_cost_usd)
            .await?;

        tracing::info!(agent = %self.name, session = %session_id, "streaming run finished");
        Ok(RunOutcome {
            response,
            session_id,
        })
    }
}
