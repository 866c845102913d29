//! OAuth Token Bundle 与 resource URL 规范化

use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

/// 过期判定提前量，避免和服务端过期时间赛跑
pub const EXPIRY_SKEW_MS: i64 = 60_000;

/// `resource_server` 只给出主机名时拼接的 API 后缀
const RESOURCE_SERVER_API_SUFFIX: &str = "/v1";
const VERSIONED_SUFFIX: &str = "/v1";

/// OAuth token bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBundle {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// 过期时间（epoch 毫秒）；为空表示永不过期
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// 覆盖 Provider 默认请求源（已规范化）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
}

impl TokenBundle {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            resource_url: None,
        }
    }

    /// 在给定时间点是否已过期（含 60s 提前量）
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_ms >= expires_at - EXPIRY_SKEW_MS,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.trim().is_empty()
    }
}

/// 当前时间（epoch 毫秒）
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// 规范化 resource URL：补全 scheme、去掉末尾斜杠、强制 `/v1` 后缀
///
/// 无法解析为 URL 时返回 `None`。
pub fn normalize_resource_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let parsed = Url::parse(&with_scheme).ok()?;
    parsed.host_str()?;

    let mut base = with_scheme.trim_end_matches('/').to_string();
    if !base.ends_with(VERSIONED_SUFFIX) {
        base.push_str(VERSIONED_SUFFIX);
    }
    Some(base)
}

/// 从 token 响应中推导路由：resource_url → endpoint → resource_server + 后缀
pub fn derive_resource_url(
    resource_url: Option<&str>,
    endpoint: Option<&str>,
    resource_server: Option<&str>,
) -> Option<String> {
    fn non_empty(v: Option<&str>) -> Option<&str> {
        v.map(str::trim).filter(|s| !s.is_empty())
    }

    if let Some(url) = non_empty(resource_url) {
        return normalize_resource_url(url);
    }
    if let Some(url) = non_empty(endpoint) {
        return normalize_resource_url(url);
    }
    non_empty(resource_server).and_then(|host| {
        let host = host.trim_end_matches('/');
        normalize_resource_url(&format!("{host}{RESOURCE_SERVER_API_SUFFIX}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let now = 1_700_000_000_000;
        let mut bundle = TokenBundle::new("at");

        bundle.expires_at = Some(now + 59_000);
        assert!(bundle.is_expired_at(now));

        bundle.expires_at = Some(now + 61_000);
        assert!(!bundle.is_expired_at(now));

        bundle.expires_at = Some(now + 60_000);
        assert!(bundle.is_expired_at(now));
    }

    #[test]
    fn test_missing_expiry_never_expires() {
        let bundle = TokenBundle::new("at");
        assert!(!bundle.is_expired_at(i64::MAX));
    }

    #[test]
    fn test_normalize_resource_url() {
        assert_eq!(
            normalize_resource_url("portal.qwen.ai").as_deref(),
            Some("https://portal.qwen.ai/v1")
        );
        assert_eq!(
            normalize_resource_url("https://portal.qwen.ai/v1/").as_deref(),
            Some("https://portal.qwen.ai/v1")
        );
        assert_eq!(
            normalize_resource_url("http://localhost:8080/").as_deref(),
            Some("http://localhost:8080/v1")
        );
        assert_eq!(normalize_resource_url("   "), None);
    }

    #[test]
    fn test_derive_priority() {
        assert_eq!(
            derive_resource_url(Some("a.example.com"), Some("b.example.com"), Some("c"))
                .as_deref(),
            Some("https://a.example.com/v1")
        );
        assert_eq!(
            derive_resource_url(None, Some("https://b.example.com/api/"), Some("c")).as_deref(),
            Some("https://b.example.com/api/v1")
        );
        assert_eq!(
            derive_resource_url(Some(""), None, Some("c.example.com")).as_deref(),
            Some("https://c.example.com/v1")
        );
        assert_eq!(
            derive_resource_url(Some("   "), Some(" portal.qwen.ai "), None).as_deref(),
            Some("https://portal.qwen.ai/v1")
        );
        assert_eq!(derive_resource_url(None, None, None), None);
    }

    #[test]
    fn test_serialized_layout() {
        let bundle = TokenBundle {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expires_at: Some(42),
            resource_url: None,
        };
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"accessToken": "at", "refreshToken": "rt", "expiresAt": 42})
        );
    }
}
