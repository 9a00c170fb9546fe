//! Drone - Rust 无头智能体客户端
//!
//! 入口：初始化日志与配置，把命令行余下参数当作提示词做一次单发查询。
//! DRONE_SESSION 指定会话 ID 时以 --resume 延续该会话。

use anyhow::Context;
use drone::config::load_config;
use drone::session::create_session_store;
use drone::{AgentOrchestrator, HeadlessClient, RunOptions};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).context("Failed to load config")?;

    let prompt: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.is_empty() {
        anyhow::bail!("usage: drone <prompt>");
    }

    let client = HeadlessClient::from_config(&cfg);
    let store =
        create_session_store(cfg.store.db_path.as_deref().map(std::path::Path::new)).await;
    let orchestrator = AgentOrchestrator::new(cfg.app.name.clone(), client, store);

    let opts = RunOptions {
        session_id: std::env::var("DRONE_SESSION").ok(),
        ..Default::default()
    };
    let outcome = orchestrator
        .run(&prompt, &opts)
        .await
        .context("Query failed")?;

    println!("{}", outcome.response.result_text().unwrap_or_default());
    eprintln!("session: {}", outcome.session_id);

    Ok(())
}
