//! 端到端集成测试：用临时 shell 脚本扮演外部 CLI
//!
//! 覆盖四类路径：文本单发、内嵌错误裁决、流式多消息、会话恢复的参数
//! 往返，以及流式运行的落库行为。

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::StreamExt;
use tempfile::TempDir;

use drone::protocol::StreamMessage;
use drone::session::{MemorySessionStore, SessionState, SessionStore};
use drone::{
    AgentOrchestrator, ClientError, CliRequest, HeadlessClient, OutputFormat, Response, RunOptions,
};

/// 写一个可执行脚本充当外部程序
fn write_script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[tokio::test]
async fn text_query_passes_stdout_through() {
    let dir = TempDir::new().unwrap();
    let program = write_script(&dir, "fake-cli", "printf '4\\n'");

    let client = HeadlessClient::new(program);
    let response = client.query("2+2?", &CliRequest::default()).await.unwrap();
    match response {
        Response::Text(t) => {
            assert_eq!(t.text, "4\n");
            assert_eq!(t.exit_code, 0);
        }
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn embedded_error_flag_beats_clean_exit() {
    let dir = TempDir::new().unwrap();
    let program = write_script(
        &dir,
        "fake-cli",
        r#"printf '{"is_error":true,"result":"disk full","session_id":"S1"}\n'"#,
    );

    let client = HeadlessClient::new(program);
    let req = CliRequest {
        output_format: OutputFormat::Json,
        ..Default::default()
    };
    let err = client.query("do it", &req).await.unwrap_err();
    match err {
        ClientError::Api { message, payload } => {
            assert_eq!(message, "disk full");
            assert_eq!(payload["session_id"], "S1");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn streaming_yields_each_message_in_order() {
    let dir = TempDir::new().unwrap();
    let program = write_script(
        &dir,
        "fake-cli",
        r#"printf '{"type":"init","session_id":"S2"}\n'
printf '{"type":"assistant","content":[{"type":"text","text":"th"}]}\n'
printf '{"type":"assistant","content":[{"type":"text","text":"ink"}]}\n'
printf '{"type":"result","session_id":"S2","num_turns":1,"total_cost_usd":0.01,"result":"think"}\n'"#,
    );

    let client = HeadlessClient::new(program);
    let mut stream = client
        .stream("ponder", &CliRequest::default())
        .await
        .unwrap();

    let mut messages = Vec::new();
    while let Some(item) = stream.next().await {
        messages.push(item.unwrap());
    }
    assert_eq!(messages.len(), 4);
    assert!(matches!(messages[0], StreamMessage::Init { .. }));
    assert!(messages[3].is_terminal());
    assert_eq!(messages[3].session_id(), Some("S2"));
    assert_eq!(stream.exit_code(), Some(0));
}

#[tokio::test]
async fn message_stream_adapts_to_futures_stream() {
    let dir = TempDir::new().unwrap();
    let program = write_script(
        &dir,
        "fake-cli",
        r#"printf '{"type":"init","session_id":"S2"}\n'
printf '{"type":"assistant","content":[{"type":"text","text":"ok"}]}\n'
printf '{"type":"result","session_id":"S2","num_turns":1}\n'"#,
    );

    let client = HeadlessClient::new(program);
    let stream = client
        .stream("ponder", &CliRequest::default())
        .await
        .unwrap()
        .into_stream();

    let messages: Vec<StreamMessage> = stream.map(|item| item.unwrap()).collect().await;
    assert_eq!(messages.len(), 3);
    assert!(messages[2].is_terminal());
}

#[tokio::test]
async fn resumed_session_round_trips_its_id() {
    let dir = TempDir::new().unwrap();
    let argv_file = dir.path().join("argv.txt");
    let program = write_script(
        &dir,
        "fake-cli",
        &format!(
            r#"printf '%s\n' "$@" > {}
printf '{{"session_id":"S1","result":"ok","num_turns":2,"total_cost_usd":0.03}}\n'"#,
            argv_file.display()
        ),
    );

    let client = HeadlessClient::new(program);
    let mut session = client.resume_session("S1");
    let response = session
        .send("and now?", &CliRequest::default())
        .await
        .unwrap();

    assert_eq!(response.session_id(), Some("S1"));
    assert_eq!(session.state(), &SessionState::Active("S1".to_string()));
    assert_eq!(session.history().len(), 2);
    assert_eq!(session.metadata().unwrap().turn_count, 2);

    // 参数往返：--resume 紧跟会话 ID，提示词是最后一个裸参数
    let argv = std::fs::read_to_string(&argv_file).unwrap();
    let lines: Vec<&str> = argv.lines().collect();
    let pos = lines.iter().position(|a| *a == "--resume").unwrap();
    assert_eq!(lines[pos + 1], "S1");
    assert_eq!(*lines.last().unwrap(), "and now?");
    assert_eq!(lines[0], "-p");
}

#[tokio::test]
async fn streaming_run_persists_raw_messages_and_turns() {
    let dir = TempDir::new().unwrap();
    let program = write_script(
        &dir,
        "fake-cli",
        r#"printf '{"type":"init","session_id":"S9"}\n'
printf '{"type":"assistant","content":[{"type":"text","text":"th"}]}\n'
printf '{"type":"assistant","content":[{"type":"text","text":"ink"}]}\n'
printf '{"type":"result","session_id":"S9","num_turns":1,"total_cost_usd":0.01,"result":"think"}\n'"#,
    );

    let store = Arc::new(MemorySessionStore::new());
    let orchestrator = AgentOrchestrator::new(
        "worker",
        HeadlessClient::new(program),
        store.clone() as Arc<dyn SessionStore>,
    );

    let outcome = orchestrator
        .run_stream("ponder", &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.session_id, "S9");
    match &outcome.response {
        Response::StreamJson(s) => {
            assert_eq!(s.messages.len(), 4);
            assert_eq!(s.final_result.result.as_deref(), Some("think"));
        }
        other => panic!("unexpected response: {:?}", other),
    }

    // 每条原始消息逐条落库
    assert_eq!(store.raw_message_count("S9").await, 4);

    let history = store.get_history("S9").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "ponder");
    assert_eq!(history[1].content, "think");

    let meta = store.get_session("S9").await.unwrap().unwrap();
    assert_eq!(meta.turn_count, 1);
    assert!((meta.total_cost_usd - 0.01).abs() < f64::EPSILON);
}

#[tokio::test]
async fn stdin_driven_call_applies_same_error_precedence() {
    // 提示词不上命令行：程序从 stdin 读取载荷，裁决规则与 query 一致
    let dir = TempDir::new().unwrap();
    let program = write_script(
        &dir,
        "fake-cli",
        r#"payload=$(cat)
if [ "$payload" = "rm -rf /" ]; then
  printf '{"is_error":true,"result":"refused","session_id":"S4"}\n'
else
  printf '{"is_error":false,"result":"done","session_id":"S4","num_turns":1}\n'
fi"#,
    );

    let client = HeadlessClient::new(program);
    let req = CliRequest {
        output_format: OutputFormat::Json,
        ..Default::default()
    };

    // 载荷优先：退出码为 0 也要按 is_error 报 Api 错误
    let err = client.call_with_stdin("rm -rf /", &req).await.unwrap_err();
    match err {
        ClientError::Api { message, payload } => {
            assert_eq!(message, "refused");
            assert_eq!(payload["session_id"], "S4");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let response = client.call_with_stdin("ls", &req).await.unwrap();
    assert_eq!(response.session_id(), Some("S4"));
    assert_eq!(response.result_text(), Some("done"));
}

#[tokio::test]
async fn stream_error_terminal_surfaces_as_api_error() {
    let dir = TempDir::new().unwrap();
    let program = write_script(
        &dir,
        "fake-cli",
        r#"printf '{"type":"init","session_id":"S3"}\n'
printf '{"type":"error","message":"overloaded","code":"529"}\n'"#,
    );

    let client = HeadlessClient::new(program);
    let req = CliRequest {
        output_format: OutputFormat::StreamJson,
        ..Default::default()
    };
    let err = client.query("go", &req).await.unwrap_err();
    assert!(matches!(err, ClientError::Api { .. }));
}
