//! 进程执行器：启动外部 CLI、喂 stdin、收集或流式读取输出
//!
//! 两种超时策略：缓冲模式用单一绝对超时竞速整次执行；流式模式用空闲超时，
//! 每收到一块输出就重新计时，只限制静默窗口而不限制总时长。
//! 所有退出路径（成功、解码失败、超时、取消）都保证子进程被终止，不留泄漏。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{ClientError, TimeoutKind};

/// 单次执行的选项
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// stdin 载荷：写入后立即关闭管道；None 时管道直接关闭（绝不等待交互输入）
    pub stdin: Option<String>,
    pub timeout: Duration,
    pub cwd: Option<PathBuf>,
    /// 调用方主动中止用；取消时先杀进程、释放管道，再传播错误
    pub cancel: CancellationToken,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            stdin: None,
            timeout: Duration::from_secs(300),
            cwd: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// 缓冲模式的完整输出
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// 外部程序执行器；持有子进程生命周期
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn command(&self, args: &[String], opts: &ExecOptions) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    fn spawn(&self, args: &[String], opts: &ExecOptions) -> Result<Child, ClientError> {
        self.command(args, opts).spawn().map_err(|e| {
            ClientError::process(format!(
                "Failed to spawn '{}': {}",
                self.program.display(),
                e
            ))
        })
    }

    /// stdin 写入后关闭；无载荷时直接关闭管道
    ///
    /// 写入可能因管道写满而长时间阻塞（子进程不读 stdin 时），
    /// 所以必须跑在超时竞速之内，绝不在竞速开始前单独 await。
    async fn feed_stdin(
        stdin: Option<ChildStdin>,
        payload: Option<String>,
    ) -> Result<(), ClientError> {
        if let Some(mut sin) = stdin {
            if let Some(data) = payload {
                sin.write_all(data.as_bytes())
                    .await
                    .map_err(|e| ClientError::process(format!("Failed to write stdin: {}", e)))?;
            }
            drop(sin);
        }
        Ok(())
    }

    /// 缓冲执行：绝对超时竞速整次执行（stdin 写入也在竞速之内），
    /// 超时后子进程随 future 一起被丢弃并杀死
    pub async fn execute(
        &self,
        args: &[String],
        mut opts: ExecOptions,
    ) -> Result<ExecOutput, ClientError> {
        tracing::debug!(program = %self.program.display(), argc = args.len(), "executing buffered");
        let mut child = self.spawn(args, &opts)?;
        let stdin_pipe = child.stdin.take();
        let payload = opts.stdin.take();

        let run = async move {
            Self::feed_stdin(stdin_pipe, payload).await?;
            child
                .wait_with_output()
                .await
                .map_err(|e| ClientError::process(format!("Failed to collect output: {}", e)))
        };
        let output = tokio::select! {
            r = tokio::time::timeout(opts.timeout, run) => match r {
                Ok(done) => done?,
                Err(_) => {
                    // run future 被丢弃即丢弃 child，kill_on_drop 负责收尸
                    return Err(ClientError::Timeout {
                        kind: TimeoutKind::Absolute,
                        elapsed_ms: opts.timeout.as_millis() as u64,
                    });
                }
            },
            _ = opts.cancel.cancelled() => {
                return Err(ClientError::process("execution cancelled by caller"));
            }
        };

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    /// 流式执行：返回原始输出块序列，空闲超时随每块输出重新计时
    ///
    /// stdin 在后台任务里写入，立即返回流：写入阻塞不推迟空闲超时起算。
    pub async fn execute_streaming(
        &self,
        args: &[String],
        mut opts: ExecOptions,
    ) -> Result<ChunkStream, ClientError> {
        tracing::debug!(program = %self.program.display(), argc = args.len(), "executing streaming");
        let mut child = self.spawn(args, &opts)?;

        let stdin_pipe = child.stdin.take();
        let payload = opts.stdin.take();
        tokio::spawn(async move {
            if let Err(e) = Self::feed_stdin(stdin_pipe, payload).await {
                tracing::warn!("Failed to feed child stdin: {}", e);
            }
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::process("child stdout pipe missing"))?;

        // stderr 后台排空，防止管道写满阻塞子进程；内容留作错误诊断
        let stderr_task = child.stderr.take().map(|mut serr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = serr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).to_string()
            })
        });

        Ok(ChunkStream {
            child,
            stdout,
            stderr_task,
            idle_timeout: opts.timeout,
            cancel: opts.cancel,
            carry: Vec::new(),
            finished: false,
            exit_code: None,
        })
    }
}

/// 外部程序 stdout 的增量块序列
///
/// 惰性、有限、不可重启。EOF 时回收子进程并记录退出码；任何错误路径
/// （空闲超时、读失败、取消）都先杀死子进程再返回错误。
pub struct ChunkStream {
    child: Child,
    stdout: ChildStdout,
    stderr_task: Option<JoinHandle<String>>,
    idle_timeout: Duration,
    cancel: CancellationToken,
    /// 跨块的不完整 UTF-8 尾巴
    carry: Vec<u8>,
    finished: bool,
    exit_code: Option<i32>,
}

impl ChunkStream {
    /// 下一块输出文本；流结束返回 None，之后 exit_code 可用
    pub async fn next_chunk(&mut self) -> Option<Result<String, ClientError>> {
        loop {
            if self.finished {
                return None;
            }

            let mut buf = [0u8; 4096];
            let read = tokio::select! {
                r = tokio::time::timeout(self.idle_timeout, self.stdout.read(&mut buf)) => match r {
                    Err(_) => {
                        self.kill().await;
                        return Some(Err(ClientError::Timeout {
                            kind: TimeoutKind::Idle,
                            elapsed_ms: self.idle_timeout.as_millis() as u64,
                        }));
                    }
                    Ok(Err(e)) => {
                        self.kill().await;
                        return Some(Err(ClientError::process(format!(
                            "Failed to read child stdout: {}",
                            e
                        ))));
                    }
                    Ok(Ok(n)) => n,
                },
                _ = self.cancel.cancelled() => {
                    self.kill().await;
                    return Some(Err(ClientError::process("stream cancelled by caller")));
                }
            };

            if read == 0 {
                self.finished = true;
                self.exit_code = self.reap().await;
                // EOF 时若 carry 还有残缺字节，按 lossy 规则吐出
                if !self.carry.is_empty() {
                    let rest = String::from_utf8_lossy(&self.carry).into_owned();
                    self.carry.clear();
                    return Some(Ok(rest));
                }
                return None;
            }

            self.carry.extend_from_slice(&buf[..read]);
            let text = self.take_valid_utf8();
            if !text.is_empty() {
                return Some(Ok(text));
            }
            // 整块都是半个多字节字符：继续读，不吐空块
        }
    }

    /// 取出 carry 中最长的合法 UTF-8 前缀，残缺尾巴留待下一块
    fn take_valid_utf8(&mut self) -> String {
        match std::str::from_utf8(&self.carry) {
            Ok(s) => {
                let text = s.to_string();
                self.carry.clear();
                text
            }
            Err(e) => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.carry[..valid]).into_owned();
                self.carry.drain(..valid);
                text
            }
        }
    }

    /// 显式关闭：杀死子进程并回收；幂等
    pub async fn close(&mut self) {
        if !self.finished {
            self.kill().await;
        }
    }

    /// 流结束（EOF 正常回收）后的退出码
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// 已排空的 stderr 内容（仅在流结束或关闭后有意义）
    pub async fn stderr(&mut self) -> String {
        match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        }
    }

    async fn kill(&mut self) {
        self.finished = true;
        let _ = self.child.start_kill();
        match self.child.wait().await {
            Ok(status) => self.exit_code = status.code(),
            Err(e) => tracing::warn!("Failed to reap killed child: {}", e),
        }
    }

    async fn reap(&mut self) -> Option<i32> {
        match self.child.wait().await {
            Ok(status) => Some(status.code().unwrap_or(-1)),
            Err(e) => {
                tracing::warn!("Failed to wait for child exit: {}", e);
                None
            }
        }
    }
}
