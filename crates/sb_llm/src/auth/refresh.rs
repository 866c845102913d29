//! Token 刷新策略
//!
//! - bundle 未过期：原样返回
//! - 过期且有 refresh token：调用一次 refresh，写回存储
//! - 过期且无 refresh token：清除 token，返回 `None`
//! - refresh 调用失败：清除 token（旧 refresh token 视为永久失效），不重试
//!
//! 同一 Provider 的刷新串行执行：部分 OAuth 服务端在 refresh token 首次兑换后
//! 即将其作废，后到的调用方在拿到锁后会先复查存储，直接复用刚刷新的 bundle。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sb_core::{ProviderKind, Result, SwitchboardError};

use super::credential_store::CredentialStore;
use super::oauth_client::OAuthEndpoints;
use super::token::{now_ms, TokenBundle};

/// 解析后的请求凭据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAuth {
    /// Bearer 凭据（access token 或 API Key）
    pub bearer: String,
    /// OAuth bundle 指定的请求源；API Key 认证时为空
    pub base_url_override: Option<String>,
}

/// Token 刷新策略
pub struct TokenRefreshPolicy {
    store: Arc<CredentialStore>,
    endpoints: HashMap<ProviderKind, Arc<dyn OAuthEndpoints>>,
    locks: Mutex<HashMap<ProviderKind, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenRefreshPolicy {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            endpoints: HashMap::new(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 注册某个 Provider 的 refresh 端点
    pub fn with_endpoints(mut self, provider: ProviderKind, endpoints: Arc<dyn OAuthEndpoints>) -> Self {
        self.endpoints.insert(provider, endpoints);
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// 确保 token 有效，必要时刷新
    pub async fn ensure_valid(&self, provider: ProviderKind) -> Result<Option<TokenBundle>> {
        match self.store.token(provider) {
            None => return Ok(None),
            Some(bundle) if !bundle.is_expired() => return Ok(Some(bundle)),
            Some(_) => {}
        }

        let lock = self.lock_for(provider);
        let _guard = lock.lock().await;

        // 等锁期间可能已被其他调用方刷新或清除
        let bundle = match self.store.token(provider) {
            None => return Ok(None),
            Some(bundle) if !bundle.is_expired() => return Ok(Some(bundle)),
            Some(bundle) => bundle,
        };

        let refresh_token = bundle
            .refresh_token
            .clone()
            .filter(|t| !t.trim().is_empty());
        let (Some(refresh_token), Some(endpoints)) = (refresh_token, self.endpoints.get(&provider))
        else {
            tracing::info!(%provider, "token expired without a usable refresh token, signing out");
            self.store.clear_token(provider)?;
            return Ok(None);
        };

        let refreshed = match endpoints.refresh_token(&refresh_token).await {
            Ok(resp) => resp.into_bundle(now_ms(), Some(&bundle)),
            Err(e) => {
                tracing::warn!(%provider, "token refresh failed: {e}");
                self.store.clear_token(provider)?;
                return Err(SwitchboardError::AuthenticationExpired(format!(
                    "{provider} token refresh failed, sign in again: {e}"
                )));
            }
        };

        match refreshed {
            Some(new_bundle) => {
                self.store.set_token(provider, new_bundle.clone())?;
                tracing::info!(%provider, "access token refreshed");
                Ok(Some(new_bundle))
            }
            None => {
                self.store.clear_token(provider)?;
                Err(SwitchboardError::AuthenticationExpired(format!(
                    "{provider} refresh response carried no access token, sign in again"
                )))
            }
        }
    }

    /// 解析请求凭据：有效 token 优先，其次 API Key
    pub async fn resolve_auth(&self, provider: ProviderKind) -> Result<ResolvedAuth> {
        let had_token = self
            .store
            .get(provider)
            .is_some_and(|record| record.has_token());

        let token_error = match self.ensure_valid(provider).await {
            Ok(Some(bundle)) if bundle.has_access_token() => {
                return Ok(ResolvedAuth {
                    bearer: bundle.access_token,
                    base_url_override: bundle.resource_url,
                });
            }
            Ok(_) => None,
            Err(e) => Some(e),
        };

        if let Some(key) = self
            .store
            .get(provider)
            .and_then(|record| record.api_key)
            .filter(|key| !key.trim().is_empty())
        {
            return Ok(ResolvedAuth {
                bearer: key,
                base_url_override: None,
            });
        }

        match token_error {
            Some(e) => Err(e),
            None if had_token => Err(SwitchboardError::AuthenticationExpired(format!(
                "{provider} session expired, sign in again"
            ))),
            None => Err(SwitchboardError::AuthenticationMissing(provider.to_string())),
        }
    }

    fn lock_for(&self, provider: ProviderKind) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(provider).or_default().clone()
    }
}
