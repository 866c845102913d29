//! 流式响应归一化
//!
//! 把 Provider 的原始字节流拆成帧，提取文本增量，通过回调逐段交付。
//! 支持两种帧格式：
//! - NDJSON：每行一个 JSON 对象（Ollama）
//! - SSE：`data:` 前缀的行，`[DONE]` 提前结束（OpenAI 兼容接口）
//!
//! 字节先按 `\n` 切分再做 UTF-8 解码，跨两次读取的多字节字符不会被截断；
//! 未以换行结尾的残行保留到下一次读取。单帧解析失败只记日志并跳过。
//! 取消信号在每次读取和每次交付前检查，取消之后不会再调用回调。
//! 带 `error` 字段的帧结束读取，错误信息记入 `StreamOutcome::error`。

use std::fmt::Display;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_core::{Result, SwitchboardError};

/// 文本增量回调
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// 帧格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDialect {
    NdJson,
    Sse,
}

/// 一次流式读取的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    /// 已交付的全部文本
    pub text: String,
    /// 是否因取消而提前结束
    pub cancelled: bool,
    /// Provider 在流中报告的错误
    pub error: Option<String>,
}

enum Frame {
    Payload(Value),
    Done,
    Skip,
}

/// 错误帧：SSE `{"error": {"message": ...}}` 或 NDJSON `{"error": "..."}`
fn frame_error(value: &Value) -> Option<String> {
    let err = value.get("error").filter(|e| !e.is_null())?;
    Some(match err {
        Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    })
}

fn parse_line(dialect: FrameDialect, raw: &[u8]) -> Frame {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return Frame::Skip;
    }

    let payload = match dialect {
        FrameDialect::NdJson => line,
        FrameDialect::Sse => match line.strip_prefix("data:") {
            Some(data) => data.trim_start(),
            // event: / id: / 注释行
            None => return Frame::Skip,
        },
    };
    if dialect == FrameDialect::Sse && payload == "[DONE]" {
        return Frame::Done;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Frame::Payload(value),
        Err(e) => {
            let err = SwitchboardError::StreamFrameMalformed(format!(
                "{e} (frame: {})",
                payload.chars().take(80).collect::<String>()
            ));
            tracing::warn!("skipping frame: {err}");
            Frame::Skip
        }
    }
}

/// 读取字节流并逐段交付文本增量
pub async fn normalize_stream<S, B, E, F>(
    body: S,
    dialect: FrameDialect,
    extract_delta: F,
    on_chunk: &(dyn Fn(&str) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<StreamOutcome>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    F: Fn(&Value) -> Option<String>,
{
    let mut body = std::pin::pin!(body);
    let mut buffer: Vec<u8> = Vec::new();
    let mut outcome = StreamOutcome::default();

    // 返回 true 表示流已结束（[DONE]、错误帧或取消）
    let deliver = |raw: &[u8], outcome: &mut StreamOutcome| -> bool {
        match parse_line(dialect, raw) {
            Frame::Skip => false,
            Frame::Done => true,
            Frame::Payload(value) => {
                if cancel.is_cancelled() {
                    outcome.cancelled = true;
                    return true;
                }
                if let Some(message) = frame_error(&value) {
                    tracing::warn!("stream reported an error: {message}");
                    outcome.error = Some(message);
                    return true;
                }
                if let Some(delta) = extract_delta(&value).filter(|d| !d.is_empty()) {
                    on_chunk(&delta);
                    outcome.text.push_str(&delta);
                }
                false
            }
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                outcome.cancelled = true;
                return Ok(outcome);
            }
            item = body.next() => item,
        };
        let Some(item) = next else {
            break;
        };

        let bytes = item.map_err(|e| {
            SwitchboardError::ProviderRequestFailed(format!("stream read error: {e}"))
        })?;
        buffer.extend_from_slice(bytes.as_ref());

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            if deliver(&line, &mut outcome) {
                return Ok(outcome);
            }
        }
    }

    // 最后一行可能没有换行符
    if !buffer.is_empty() {
        deliver(&buffer, &mut outcome);
    }
    Ok(outcome)
}
