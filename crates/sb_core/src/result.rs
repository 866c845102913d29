//! 统一生成结果
//!
//! 所有 Provider Client 与网关都返回同一个结构：
//! `success == true` 时必有 `data`，`success == false` 时必有 `error`。
//! 字段只能通过构造函数写入，从而保证这一不变量。

use serde::{Deserialize, Serialize};

/// 生成结果 `{success, data?, error?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl GenerationResult {
    pub fn ok(data: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn into_data(self) -> Option<String> {
        self.data
    }

    /// 转为流式调用面向调用方的结果（数据已经通过回调送达）
    pub fn into_stream_result(self) -> StreamResult {
        StreamResult {
            success: self.success,
            error: self.error,
        }
    }
}

/// 流式调用结果 `{success, error?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_carries_data() {
        let r = GenerationResult::ok("{\"x\":1}");
        assert!(r.is_success());
        assert_eq!(r.data(), Some("{\"x\":1}"));
        assert!(r.error().is_none());
        assert_eq!(r.into_data().as_deref(), Some("{\"x\":1}"));
    }

    #[test]
    fn test_failure_carries_error() {
        let r = GenerationResult::failure("boom");
        assert!(!r.is_success());
        assert!(r.data().is_none());
        assert_eq!(r.error(), Some("boom"));

        let s = r.into_stream_result();
        assert!(!s.success);
        assert_eq!(s.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(GenerationResult::ok("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": "hi"}));
        let json = serde_json::to_value(GenerationResult::failure("no")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "no"}));
    }
}
