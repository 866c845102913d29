//! OAuth 设备授权端点
//!
//! 设备码申请、token 轮询与 refresh 三个调用。轮询的 pending / slow_down 以 4xx
//! 返回，所以轮询响应无论状态码都先尝试按 JSON 解码。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use sb_core::{Result, SwitchboardError};

use super::pkce::{PkceChallenge, PkceVerifier};
use super::token::{derive_resource_url, TokenBundle};
use crate::config::OAuthSettings;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const REFRESH_GRANT: &str = "refresh_token";

/// 设备码申请响应
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    /// 建议轮询间隔（秒）
    #[serde(default)]
    pub interval: Option<u64>,
}

/// token 端点响应（成功或错误共用）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// 有效期（秒）
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub resource_url: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub resource_server: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenResponse {
    /// 非空 access token
    pub fn access_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
    }

    /// 转为 token bundle；没有 access token 时返回 `None`
    ///
    /// `previous` 为刷新前的 bundle：响应缺少 refresh token 或路由字段时沿用旧值。
    pub fn into_bundle(self, now_ms: i64, previous: Option<&TokenBundle>) -> Option<TokenBundle> {
        let access_token = self.access_token()?.to_string();
        let resource_url = derive_resource_url(
            self.resource_url.as_deref(),
            self.endpoint.as_deref(),
            self.resource_server.as_deref(),
        )
        .or_else(|| previous.and_then(|p| p.resource_url.clone()));
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| previous.and_then(|p| p.refresh_token.clone()));

        Some(TokenBundle {
            access_token,
            refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| now_ms.saturating_add(secs.saturating_mul(1000))),
            resource_url,
        })
    }

    /// 面向用户的错误描述
    pub fn error_message(&self) -> String {
        match (&self.error, &self.error_description) {
            (_, Some(desc)) if !desc.trim().is_empty() => desc.clone(),
            (Some(code), _) => code.clone(),
            _ => "token endpoint returned no access token".to_string(),
        }
    }
}

/// 设备授权所需的 OAuth 端点
#[async_trait]
pub trait OAuthEndpoints: Send + Sync {
    async fn request_device_code(&self, challenge: &PkceChallenge) -> Result<DeviceCodeResponse>;

    async fn poll_token(&self, device_code: &str, verifier: &PkceVerifier) -> Result<TokenResponse>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse>;
}

/// 基于 reqwest 的设备授权客户端（表单编码）
pub struct DeviceOAuthClient {
    settings: OAuthSettings,
    client: reqwest::Client,
}

impl DeviceOAuthClient {
    pub fn new(settings: OAuthSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { settings, client }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<(reqwest::StatusCode, String)> {
        let resp = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| {
                SwitchboardError::ProviderRequestFailed(format!("oauth: request to {url} failed: {e}"))
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| {
            SwitchboardError::ProviderRequestFailed(format!("oauth: read response failed: {e}"))
        })?;
        Ok((status, text))
    }
}

#[async_trait]
impl OAuthEndpoints for DeviceOAuthClient {
    async fn request_device_code(&self, challenge: &PkceChallenge) -> Result<DeviceCodeResponse> {
        let form = [
            ("client_id", self.settings.client_id.as_str()),
            ("scope", self.settings.scope.as_str()),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", challenge.method()),
        ];
        let (status, text) = self.post_form(&self.settings.device_code_url, &form).await?;
        if !status.is_success() {
            return Err(SwitchboardError::ProviderRequestFailed(format!(
                "oauth: device authorization failed with status {}: {}",
                status,
                text.trim()
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            SwitchboardError::ProviderRequestFailed(format!(
                "oauth: decode device authorization response failed: {e}"
            ))
        })
    }

    async fn poll_token(&self, device_code: &str, verifier: &PkceVerifier) -> Result<TokenResponse> {
        let form = [
            ("grant_type", DEVICE_CODE_GRANT),
            ("client_id", self.settings.client_id.as_str()),
            ("device_code", device_code),
            ("code_verifier", verifier.as_str()),
        ];
        let (status, text) = self.post_form(&self.settings.token_url, &form).await?;

        match serde_json::from_str::<TokenResponse>(&text) {
            Ok(token) => Ok(token),
            Err(e) => Err(SwitchboardError::ProviderRequestFailed(format!(
                "oauth: decode token response failed ({status}): {e}"
            ))),
        }
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let form = [
            ("grant_type", REFRESH_GRANT),
            ("client_id", self.settings.client_id.as_str()),
            ("refresh_token", refresh_token),
        ];
        let (status, text) = self.post_form(&self.settings.token_url, &form).await?;
        if !status.is_success() {
            return Err(SwitchboardError::ProviderRequestFailed(format!(
                "oauth: refresh failed with status {}: {}",
                status,
                text.trim()
            )));
        }

        let token: TokenResponse = serde_json::from_str(&text).map_err(|e| {
            SwitchboardError::ProviderRequestFailed(format!("oauth: decode refresh response failed: {e}"))
        })?;
        if token.access_token().is_none() {
            return Err(SwitchboardError::ProviderRequestFailed(format!(
                "oauth: refresh rejected: {}",
                token.error_message()
            )));
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_error_message() {
        let resp: TokenResponse = serde_json::from_str(
            r#"{"error":"access_denied","error_description":"User denied the request"}"#,
        )
        .unwrap();
        assert!(resp.access_token().is_none());
        assert_eq!(resp.error_message(), "User denied the request");

        let resp: TokenResponse = serde_json::from_str(r#"{"error":"expired_token"}"#).unwrap();
        assert_eq!(resp.error_message(), "expired_token");
    }

    #[test]
    fn test_into_bundle_keeps_previous_fields() {
        let previous = TokenBundle {
            access_token: "old".into(),
            refresh_token: Some("rt-old".into()),
            expires_at: Some(0),
            resource_url: Some("https://portal.qwen.ai/v1".into()),
        };
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"new","expires_in":3600}"#).unwrap();

        let bundle = resp.into_bundle(1_000, Some(&previous)).unwrap();
        assert_eq!(bundle.access_token, "new");
        assert_eq!(bundle.refresh_token.as_deref(), Some("rt-old"));
        assert_eq!(bundle.expires_at, Some(3_601_000));
        assert_eq!(bundle.resource_url.as_deref(), Some("https://portal.qwen.ai/v1"));
    }

    #[test]
    fn test_into_bundle_derives_routing() {
        let resp: TokenResponse = serde_json::from_str(
            r#"{"access_token":"at","refresh_token":"rt","resource_server":"eu.example.com"}"#,
        )
        .unwrap();
        let bundle = resp.into_bundle(0, None).unwrap();
        assert_eq!(bundle.expires_at, None);
        assert_eq!(bundle.resource_url.as_deref(), Some("https://eu.example.com/v1"));

        let pending: TokenResponse =
            serde_json::from_str(r#"{"error":"authorization_pending"}"#).unwrap();
        assert!(pending.into_bundle(0, None).is_none());
    }

    #[test]
    fn test_device_code_response_optional_fields() {
        let resp: DeviceCodeResponse = serde_json::from_str(
            r#"{"device_code":"dc","user_code":"ABCD-1234","verification_uri":"https://x/device","expires_in":600}"#,
        )
        .unwrap();
        assert!(resp.interval.is_none());
        assert!(resp.verification_uri_complete.is_none());
    }
}
