//! 会话：进程启动时构建一次的网关上下文
//!
//! 加载凭据文件（仅此一次）、构建刷新策略、OAuth 客户端、Provider 注册表与网关，
//! 并对外提供凭据配置入口。调用方持有 `Session` 并以引用传递。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use sb_core::{ProviderKind, Result, SwitchboardError};

use crate::auth::{
    CredentialStore, DeviceAuthorizationFlow, DeviceAuthorizationSession, DeviceOAuthClient,
    OAuthEndpoints, TokenBundle, TokenRefreshPolicy,
};
use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::provider::ProviderRegistry;

/// 单个 Provider 的凭据概况
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider: ProviderKind,
    pub has_api_key: bool,
    pub signed_in: bool,
    /// token 已过期（下次调用时会尝试刷新）
    pub token_expired: bool,
    pub resource_url: Option<String>,
    pub supports_sign_in: bool,
}

impl ProviderStatus {
    pub fn is_authenticated(&self) -> bool {
        self.has_api_key || self.signed_in
    }
}

pub struct Session {
    config: GatewayConfig,
    store: Arc<CredentialStore>,
    flows: HashMap<ProviderKind, DeviceAuthorizationFlow>,
    gateway: Gateway,
}

impl Session {
    /// 按配置打开凭据文件并构建全部组件
    pub fn open(config: GatewayConfig) -> Result<Self> {
        let store = Arc::new(CredentialStore::open(config.credentials_path())?);
        let qwen_oauth: Arc<dyn OAuthEndpoints> =
            Arc::new(DeviceOAuthClient::new(config.qwen_oauth.clone()));
        Ok(Self::assemble(config, store, qwen_oauth))
    }

    /// 使用给定的存储与 OAuth 端点构建
    pub fn assemble(
        config: GatewayConfig,
        store: Arc<CredentialStore>,
        qwen_oauth: Arc<dyn OAuthEndpoints>,
    ) -> Self {
        let auth = Arc::new(
            TokenRefreshPolicy::new(store.clone())
                .with_endpoints(ProviderKind::Qwen, qwen_oauth.clone()),
        );

        // 目前只有 Qwen 提供设备授权端点
        let flows: HashMap<_, _> = ProviderKind::ALL
            .into_iter()
            .filter(ProviderKind::supports_device_flow)
            .map(|kind| {
                let flow = DeviceAuthorizationFlow::new(kind, qwen_oauth.clone(), store.clone());
                (kind, flow)
            })
            .collect();

        let registry = ProviderRegistry::from_config(&config, auth);
        let gateway = Gateway::from_config(&config, registry);
        tracing::debug!(
            data_dir = %config.data_dir.display(),
            preferred = ?config.preferred_provider,
            "session ready"
        );

        Self {
            config,
            store,
            flows,
            gateway,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn set_api_key(&self, provider: ProviderKind, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(SwitchboardError::Config(format!(
                "empty API key for {provider}"
            )));
        }
        self.store.set_api_key(provider, key)?;
        tracing::info!(%provider, "API key saved");
        Ok(())
    }

    pub fn clear_api_key(&self, provider: ProviderKind) -> Result<()> {
        self.store.clear_api_key(provider)?;
        tracing::info!(%provider, "API key removed");
        Ok(())
    }

    /// 设备授权登录；`on_prompt` 收到用户码与验证地址
    pub async fn sign_in<F>(&self, provider: ProviderKind, on_prompt: F) -> Result<TokenBundle>
    where
        F: FnOnce(&DeviceAuthorizationSession),
    {
        let flow = self.flows.get(&provider).ok_or_else(|| {
            SwitchboardError::Config(format!(
                "{provider} does not support sign-in, add an API key instead"
            ))
        })?;
        flow.sign_in(on_prompt).await
    }

    /// 退出登录（保留 API Key）
    pub fn sign_out(&self, provider: ProviderKind) -> Result<()> {
        self.store.clear_token(provider)?;
        tracing::info!(%provider, "signed out");
        Ok(())
    }

    pub fn is_authenticated(&self, provider: ProviderKind) -> bool {
        self.store.is_authenticated(provider)
    }

    pub fn status(&self) -> Vec<ProviderStatus> {
        ProviderKind::ALL
            .iter()
            .map(|&provider| {
                let record = self.store.get(provider).unwrap_or_default();
                let token = record.token.as_ref().filter(|t| t.has_access_token());
                ProviderStatus {
                    provider,
                    has_api_key: record.has_api_key(),
                    signed_in: token.is_some(),
                    token_expired: token.is_some_and(TokenBundle::is_expired),
                    resource_url: token.and_then(|t| t.resource_url.clone()),
                    supports_sign_in: provider.supports_device_flow(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::auth::oauth_client::{DeviceCodeResponse, TokenResponse};
    use crate::auth::pkce::{PkceChallenge, PkceVerifier};

    /// 第二次轮询即批准
    struct ApprovingOAuth {
        polls: AtomicUsize,
    }

    #[async_trait]
    impl OAuthEndpoints for ApprovingOAuth {
        async fn request_device_code(&self, challenge: &PkceChallenge) -> Result<DeviceCodeResponse> {
            assert_eq!(challenge.method(), "S256");
            Ok(DeviceCodeResponse {
                device_code: "dc".into(),
                user_code: "WXYZ-0001".into(),
                verification_uri: "https://chat.qwen.ai/authorize".into(),
                verification_uri_complete: Some(
                    "https://chat.qwen.ai/authorize?user_code=WXYZ-0001".into(),
                ),
                expires_in: 300,
                interval: Some(1),
            })
        }

        async fn poll_token(&self, device_code: &str, _: &PkceVerifier) -> Result<TokenResponse> {
            assert_eq!(device_code, "dc");
            if self.polls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(TokenResponse {
                    error: Some("authorization_pending".into()),
                    ..Default::default()
                });
            }
            Ok(TokenResponse {
                access_token: Some("at".into()),
                refresh_token: Some("rt".into()),
                expires_in: Some(3600),
                resource_url: Some("portal.qwen.ai".into()),
                ..Default::default()
            })
        }

        async fn refresh_token(&self, _: &str) -> Result<TokenResponse> {
            unreachable!("token is fresh")
        }
    }

    fn session() -> Session {
        let oauth = Arc::new(ApprovingOAuth {
            polls: AtomicUsize::new(0),
        });
        Session::assemble(
            GatewayConfig::default(),
            Arc::new(CredentialStore::in_memory()),
            oauth,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_in_and_out() {
        let session = session();
        assert!(!session.is_authenticated(ProviderKind::Qwen));

        let mut shown = None;
        let bundle = session
            .sign_in(ProviderKind::Qwen, |s| {
                shown = Some(s.verification_target().to_string())
            })
            .await
            .unwrap();

        assert_eq!(
            shown.as_deref(),
            Some("https://chat.qwen.ai/authorize?user_code=WXYZ-0001")
        );
        assert_eq!(bundle.resource_url.as_deref(), Some("https://portal.qwen.ai/v1"));
        assert!(session.is_authenticated(ProviderKind::Qwen));

        let qwen = session
            .status()
            .into_iter()
            .find(|s| s.provider == ProviderKind::Qwen)
            .unwrap();
        assert!(qwen.signed_in && !qwen.token_expired && qwen.supports_sign_in);

        session.sign_out(ProviderKind::Qwen).unwrap();
        assert!(!session.is_authenticated(ProviderKind::Qwen));
    }

    #[test]
    fn test_status_reports_sign_in_support() {
        let session = session();
        session.set_api_key(ProviderKind::DeepSeek, " sk-d ").unwrap();

        let status = session.status();
        assert_eq!(status.len(), ProviderKind::ALL.len());
        for entry in &status {
            assert_eq!(entry.supports_sign_in, entry.provider == ProviderKind::Qwen);
            assert_eq!(entry.is_authenticated(), entry.provider == ProviderKind::DeepSeek);
        }
    }

    #[tokio::test]
    async fn test_sign_in_requires_device_flow() {
        let err = session()
            .sign_in(ProviderKind::OpenAi, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::Config(_)));
    }

    #[test]
    fn test_api_key_surface() {
        let session = session();
        assert!(session.set_api_key(ProviderKind::DeepSeek, "  ").is_err());

        session
            .set_api_key(ProviderKind::DeepSeek, " sk-abc ")
            .unwrap();
        assert!(session.is_authenticated(ProviderKind::DeepSeek));
        assert_eq!(
            session.store().get(ProviderKind::DeepSeek).unwrap().api_key.as_deref(),
            Some("sk-abc")
        );

        let status = session.status();
        assert_eq!(status.len(), ProviderKind::ALL.len());
        assert!(status
            .iter()
            .any(|s| s.provider == ProviderKind::DeepSeek && s.is_authenticated()));

        session.clear_api_key(ProviderKind::DeepSeek).unwrap();
        assert!(!session.is_authenticated(ProviderKind::DeepSeek));
    }
}
