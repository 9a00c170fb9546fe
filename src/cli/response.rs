//! 响应归一化：三种输出形态 → 一个带标签的 Response
//!
//! 这里是「退出码 vs 内嵌 is_error」优先级的唯一裁决点，对 query 与
//! stdin 驱动两条路径一致生效：结构化 JSON 模式以载荷标志为准
//! （载荷优先），退出码只在文本模式、或载荷完全不可解析时才有话语权。

use serde_json::Value;

use crate::cli::args::OutputFormat;
use crate::cli::executor::ExecOutput;
use crate::core::ClientError;
use crate::protocol::{ResultPayload, StreamMessage};

/// 纯文本响应：stdout 原样透传
#[derive(Debug, Clone, PartialEq)]
pub struct TextResponse {
    pub text: String,
    pub exit_code: i32,
}

/// 单 JSON 文档响应
#[derive(Debug, Clone, PartialEq)]
pub struct JsonResponse {
    pub result: Option<String>,
    pub session_id: Option<String>,
    pub num_turns: u64,
    pub total_cost_usd: f64,
    pub is_error: bool,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub exit_code: i32,
}

/// 流式 JSON 响应：全部消息 + 终结消息
#[derive(Debug, Clone, PartialEq)]
pub struct StreamJsonResponse {
    pub messages: Vec<StreamMessage>,
    pub final_result: ResultPayload,
    pub exit_code: i32,
}

/// 归一化后的响应（每次请求恰好一个变体，由请求前固定的格式决定）
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Text(TextResponse),
    Json(JsonResponse),
    StreamJson(StreamJsonResponse),
}

impl Response {
    /// 本次交换确认的会话 ID（文本模式没有）
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Response::Text(_) => None,
            Response::Json(j) => j.session_id.as_deref(),
            Response::StreamJson(s) => s.final_result.session_id.as_deref(),
        }
    }

    /// 最终文本（文本模式为 stdout 原文）
    pub fn result_text(&self) -> Option<&str> {
        match self {
            Response::Text(t) => Some(&t.text),
            Response::Json(j) => j.result.as_deref(),
            Response::StreamJson(s) => s.final_result.result.as_deref(),
        }
    }

    /// 服务端上报的 (轮数, 累计费用)；文本模式没有
    pub fn usage(&self) -> Option<(u64, f64)> {
        match self {
            Response::Text(_) => None,
            Response::Json(j) => Some((j.num_turns, j.total_cost_usd)),
            Response::StreamJson(s) => {
                Some((s.final_result.num_turns, s.final_result.total_cost_usd))
            }
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Response::Text(t) => t.exit_code,
            Response::Json(j) => j.exit_code,
            Response::StreamJson(s) => s.exit_code,
        }
    }
}

/// 缓冲输出归一化（text / single-json 模式；stream-json 走 reconcile_messages）
pub fn reconcile(output: ExecOutput, format: OutputFormat) -> Result<Response, ClientError> {
    match format {
        OutputFormat::Text => {
            if output.exit_code != 0 {
                return Err(ClientError::Process {
                    message: format!("process exited with code {}", output.exit_code),
                    exit_code: Some(output.exit_code),
                    stderr: output.stderr,
                });
            }
            Ok(Response::Text(TextResponse {
                text: output.stdout,
                exit_code: output.exit_code,
            }))
        }
        OutputFormat::Json => reconcile_json(output),
        OutputFormat::StreamJson => {
            // 缓冲路径也可能拿到整段 NDJSON（如 stdin 驱动调用）
            let mut decoder = super::decoder::LineDecoder::new();
            let mut messages = decoder.feed(&output.stdout)?;
            if let Some(last) = decoder.finish()? {
                messages.push(last);
            }
            reconcile_messages(messages, output.exit_code)
        }
    }
}

fn reconcile_json(output: ExecOutput) -> Result<Response, ClientError> {
    let doc: Value = match serde_json::from_str(output.stdout.trim()) {
        Ok(v) => v,
        Err(e) => {
            // 载荷不可解析时退出码才是权威
            if output.exit_code != 0 {
                return Err(ClientError::Process {
                    message: format!("process exited with code {}", output.exit_code),
                    exit_code: Some(output.exit_code),
                    stderr: output.stderr,
                });
            }
            return Err(ClientError::Parse {
                message: format!("invalid json document: {}", e),
                line: output.stdout.trim().to_string(),
            });
        }
    };

    if doc.get("is_error").and_then(Value::as_bool) == Some(true) {
        let message = doc
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or("external program reported an error")
            .to_string();
        return Err(ClientError::Api {
            message,
            payload: doc,
        });
    }

    let payload: ResultPayload = serde_json::from_value(doc.clone()).map_err(|e| {
        ClientError::Parse {
            message: format!("malformed result document: {}", e),
            line: doc.to_string(),
        }
    })?;

    Ok(Response::Json(JsonResponse {
        result: payload.result,
        session_id: payload.session_id,
        num_turns: payload.num_turns,
        total_cost_usd: payload.total_cost_usd,
        is_error: payload.is_error,
        duration_ms: payload.duration_ms,
        duration_api_ms: payload.duration_api_ms,
        exit_code: output.exit_code,
    }))
}

/// 流式消息序列归一化：定位终结消息、裁决内嵌错误标志
pub fn reconcile_messages(
    messages: Vec<StreamMessage>,
    exit_code: i32,
) -> Result<Response, ClientError> {
    let terminal = messages.iter().rev().find(|m| m.is_terminal());

    match terminal {
        None => Err(ClientError::Parse {
            message: "no terminal message in stream".to_string(),
            line: String::new(),
        }),
        Some(StreamMessage::Error { message, code }) => Err(ClientError::Api {
            message: message.clone(),
            payload: serde_json::json!({ "message": message, "code": code }),
        }),
        Some(StreamMessage::Result(payload)) => {
            if payload.is_error {
                let message = payload
                    .result
                    .clone()
                    .unwrap_or_else(|| "external program reported an error".to_string());
                return Err(ClientError::Api {
                    message,
                    payload: serde_json::to_value(payload)
                        .unwrap_or(Value::Null),
                });
            }
            let final_result = payload.clone();
            Ok(Response::StreamJson(StreamJsonResponse {
                messages,
                final_result,
                exit_code,
            }))
        }
        Some(_) => unreachable!("is_terminal only matches result/error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(stdout: &str, exit_code: i32) -> ExecOutput {
        ExecOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
        }
    }

    #[test]
    fn text_mode_passes_stdout_verbatim() {
        let r = reconcile(out("4\n", 0), OutputFormat::Text).unwrap();
        assert_eq!(
            r,
            Response::Text(TextResponse {
                text: "4\n".into(),
                exit_code: 0
            })
        );
    }

    #[test]
    fn text_mode_nonzero_exit_is_process_error() {
        let err = reconcile(out("", 2), OutputFormat::Text).unwrap_err();
        assert!(matches!(err, ClientError::Process { exit_code: Some(2), .. }));
    }

    #[test]
    fn json_mode_embedded_error_wins_over_clean_exit() {
        let doc = r#"{"is_error":true,"result":"disk full","session_id":"S1"}"#;
        let err = reconcile(out(doc, 0), OutputFormat::Json).unwrap_err();
        match err {
            ClientError::Api { message, payload } => {
                assert_eq!(message, "disk full");
                assert_eq!(payload["session_id"], "S1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn json_mode_payload_wins_over_nonzero_exit() {
        // 载荷优先：退出码非零但文档完好，仍按文档裁决
        let doc = r#"{"is_error":false,"result":"ok","session_id":"S1","num_turns":1}"#;
        let r = reconcile(out(doc, 1), OutputFormat::Json).unwrap();
        assert_eq!(r.session_id(), Some("S1"));
        assert_eq!(r.exit_code(), 1);
    }

    #[test]
    fn json_mode_unparseable_payload_falls_back_to_exit_code() {
        let err = reconcile(out("garbage", 7), OutputFormat::Json).unwrap_err();
        assert!(matches!(err, ClientError::Process { exit_code: Some(7), .. }));

        let err = reconcile(out("garbage", 0), OutputFormat::Json).unwrap_err();
        assert!(matches!(err, ClientError::Parse { .. }));
    }

    #[test]
    fn stream_mode_requires_terminal_message() {
        let msgs = vec![StreamMessage::Init {
            session_id: Some("S1".into()),
        }];
        let err = reconcile_messages(msgs, 0).unwrap_err();
        match err {
            ClientError::Parse { message, .. } => {
                assert!(message.contains("no terminal message"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn stream_mode_collects_messages_and_final() {
        let raw = r#"{"type":"init","session_id":"S2"}
{"type":"assistant","content":[{"type":"text","text":"th"}]}
{"type":"assistant","content":[{"type":"text","text":"ink"}]}
{"type":"result","session_id":"S2","num_turns":1,"total_cost_usd":0.01}
"#;
        let r = reconcile(out(raw, 0), OutputFormat::StreamJson).unwrap();
        match r {
            Response::StreamJson(s) => {
                assert_eq!(s.messages.len(), 4);
                assert_eq!(s.final_result.session_id.as_deref(), Some("S2"));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn stream_mode_error_terminal_raises_api_error() {
        let msgs = vec![StreamMessage::Error {
            message: "overloaded".into(),
            code: None,
        }];
        let err = reconcile_messages(msgs, 0).unwrap_err();
        assert!(matches!(err, ClientError::Api { .. }));
    }

    #[test]
    fn stream_mode_is_error_result_raises_api_error() {
        let msgs = vec![StreamMessage::Result(ResultPayload {
            is_error: true,
            result: Some("budget exceeded".into()),
            ..Default::default()
        })];
        let err = reconcile_messages(msgs, 0).unwrap_err();
        match err {
            ClientError::Api { message, .. } => assert_eq!(message, "budget exceeded"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
