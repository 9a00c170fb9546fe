//! 流式消息解码器：原始文本块 → 协议消息序列
//!
//! 维护一个行尾缓冲：每块追加进缓冲，按换行切分，完整行立即解析吐出，
//! 末尾不完整片段留给下一块。流结束时缓冲中非空残留按一条完整行处理。
//! 解码结果对任意重新分块不变：同一字节流不论怎么切块，产出完全一致。

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::Stream;

use crate::cli::executor::ChunkStream;
use crate::core::ClientError;
use crate::protocol::StreamMessage;

/// 行级解码器（纯状态机，不涉及 I/O）
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入一块文本，返回其中所有完整行解析出的消息
    ///
    /// 空行与纯空白行跳过；无法解析或缺判别字段的行报 Parse 错误，
    /// 携带原始文本，绝不静默丢弃。
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<StreamMessage>, ClientError> {
        self.buf.push_str(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            out.push(Self::parse_line(trimmed)?);
        }
        Ok(out)
    }

    /// 流结束：缓冲中非空残留视为最后一条完整行
    pub fn finish(&mut self) -> Result<Option<StreamMessage>, ClientError> {
        let rest = std::mem::take(&mut self.buf);
        let trimmed = rest.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Self::parse_line(trimmed).map(Some)
        }
    }

    fn parse_line(line: &str) -> Result<StreamMessage, ClientError> {
        serde_json::from_str(line).map_err(|e| ClientError::Parse {
            message: format!("invalid stream message: {}", e),
            line: line.to_string(),
        })
    }
}

/// 协议消息的惰性序列：组合 ChunkStream 与 LineDecoder
///
/// 有限、不可重启。解析错误终止序列但不追溯已吐出的消息；
/// close() 显式杀死子进程（取消时的清理不依赖析构顺序）。
pub struct MessageStream {
    chunks: ChunkStream,
    decoder: LineDecoder,
    pending: VecDeque<StreamMessage>,
    done: bool,
}

impl MessageStream {
    pub(crate) fn new(chunks: ChunkStream) -> Self {
        Self {
            chunks,
            decoder: LineDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    /// 下一条协议消息；Err 之后序列终止（子进程已被清理）
    pub async fn next(&mut self) -> Option<Result<StreamMessage, ClientError>> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Some(Ok(msg));
            }
            if self.done {
                return None;
            }
            match self.chunks.next_chunk().await {
                Some(Ok(chunk)) => match self.decoder.feed(&chunk) {
                    Ok(msgs) => self.pending.extend(msgs),
                    Err(e) => {
                        self.done = true;
                        self.chunks.close().await;
                        return Some(Err(e));
                    }
                },
                // ChunkStream 的错误路径已自行杀死子进程
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    match self.decoder.finish() {
                        Ok(Some(msg)) => self.pending.push_back(msg),
                        Ok(None) => {}
                        Err(e) => return Some(Err(e)),
                    }
                }
            }
        }
    }

    /// 显式取消：杀死子进程并终止序列；幂等
    pub async fn close(&mut self) {
        self.done = true;
        self.pending.clear();
        self.chunks.close().await;
    }

    /// 流正常走到 EOF 后的子进程退出码
    pub fn exit_code(&self) -> Option<i32> {
        self.chunks.exit_code()
    }

    /// 适配成 futures Stream（与 LlmClient 风格的流式接口对齐）
    pub fn into_stream(
        self,
    ) -> Pin<Box<dyn Stream<Item = Result<StreamMessage, ClientError>> + Send>> {
        Box::pin(futures_util::stream::unfold(self, |mut s| async move {
            s.next().await.map(|item| (item, s))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResultPayload;

    fn msgs_from(decoder: &mut LineDecoder, chunks: &[&str]) -> Vec<StreamMessage> {
        let mut out = Vec::new();
        for c in chunks {
            out.extend(decoder.feed(c).unwrap());
        }
        if let Some(m) = decoder.finish().unwrap() {
            out.push(m);
        }
        out
    }

    const TWO_LINES: &str =
        "{\"type\":\"init\",\"session_id\":\"S1\"}\n{\"type\":\"result\",\"session_id\":\"S1\"}\n";

    #[test]
    fn rechunking_is_invariant() {
        // 整块一次喂入
        let whole = msgs_from(&mut LineDecoder::new(), &[TWO_LINES]);
        assert_eq!(whole.len(), 2);

        // 在每个字节偏移处切成两块
        for split in 1..TWO_LINES.len() {
            if !TWO_LINES.is_char_boundary(split) {
                continue;
            }
            let parts = [&TWO_LINES[..split], &TWO_LINES[split..]];
            let got = msgs_from(&mut LineDecoder::new(), &parts);
            assert_eq!(got, whole, "split at byte {}", split);
        }

        // 逐字符喂入
        let chars: Vec<String> = TWO_LINES.chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = chars.iter().map(String::as_str).collect();
        let got = msgs_from(&mut LineDecoder::new(), &refs);
        assert_eq!(got, whole);
    }

    #[test]
    fn trailing_line_without_newline_is_decoded() {
        let mut d = LineDecoder::new();
        assert!(d.feed("{\"type\":\"result\",\"session_id\":\"S9\"}").unwrap().is_empty());
        let last = d.finish().unwrap().unwrap();
        assert_eq!(
            last,
            StreamMessage::Result(ResultPayload {
                session_id: Some("S9".into()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut d = LineDecoder::new();
        let msgs = d.feed("\n   \n{\"type\":\"init\"}\n\n").unwrap();
        assert_eq!(msgs.len(), 1);
        assert!(d.finish().unwrap().is_none());
    }

    #[test]
    fn malformed_line_raises_parse_error_with_raw_text() {
        let mut d = LineDecoder::new();
        let err = d.feed("{\"type\":\"init\"}\nnot json\n").unwrap_err();
        match err {
            ClientError::Parse { line, .. } => assert_eq!(line, "not json"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn missing_discriminant_raises_parse_error() {
        let mut d = LineDecoder::new();
        let err = d.feed("{\"session_id\":\"S1\"}\n").unwrap_err();
        assert!(matches!(err, ClientError::Parse { .. }));
    }
}
