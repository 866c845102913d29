//! 结构化结果提取
//!
//! 从模型的自由文本中恢复 JSON，按可信度依次尝试：
//! 1. 整段文本直接解析
//! 2. 第一个 Markdown 代码块（可带 `json` 标记）的内容
//! 3. 第一个 `{` 到最后一个 `}` 之间的子串
//!
//! 每层失败都静默进入下一层，全部失败时返回一个 `ExtractionFailed`。

use serde::de::DeserializeOwned;
use serde_json::Value;

use sb_core::{Result, SwitchboardError};

const FENCE: &str = "```";
const PREVIEW_CHARS: usize = 60;

/// 提取 JSON 值
pub fn extract(text: &str) -> Result<Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(inner) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            tracing::debug!("extracted JSON from fenced block");
            return Ok(value);
        }
    }

    if let Some(inner) = brace_span(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            tracing::debug!("extracted JSON from brace span");
            return Ok(value);
        }
    }

    Err(SwitchboardError::ExtractionFailed(describe_shape(text)))
}

/// 提取并反序列化为具体类型
pub fn extract_as<T: DeserializeOwned>(text: &str) -> Result<T> {
    let value = extract(text)?;
    serde_json::from_value(value).map_err(|e| {
        SwitchboardError::ExtractionFailed(format!(
            "JSON recovered but does not match the expected shape: {e}"
        ))
    })
}

/// 第一个代码块的内容，去掉可选的 `json` 标记
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find(FENCE)? + FENCE.len();
    let rest = &text[start..];
    let rest = match rest.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &rest[4..],
        _ => rest,
    };
    let end = rest.find(FENCE)?;
    Some(rest[..end].trim())
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn describe_shape(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "model returned empty text".to_string();
    }

    let mut preview: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    if trimmed.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    format!(
        "no JSON found in {} chars of text (fenced block: {}, braces: {}): {:?}",
        trimmed.chars().count(),
        if trimmed.contains(FENCE) { "yes" } else { "no" },
        if trimmed.contains('{') && trimmed.contains('}') { "yes" } else { "no" },
        preview
    )
}
