//! OAuth 设备授权流程（PKCE，无 client secret）
//!
//! 状态机：`Idle → Requesting → AwaitingUser → Polling → {Succeeded | Failed | Expired}`
//!
//! 轮询规则：
//! - `authorization_pending`：间隔不变，继续
//! - `slow_down`：间隔 ×1.5，上限 10s
//! - 拿到 access token：持久化 bundle，成功
//! - `expired_token`：过期
//! - 其他错误码：失败，返回 `error_description`
//! - 网络 / 解码错误：视为瞬时错误，按原间隔重试
//!
//! 会话截止时间到达后不再轮询，调用方需要重新发起登录。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use sb_core::{ProviderKind, Result, SwitchboardError};

use super::credential_store::CredentialStore;
use super::oauth_client::OAuthEndpoints;
use super::pkce::PkceVerifier;
use super::token::{now_ms, TokenBundle};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const MAX_POLL_INTERVAL_MS: u64 = 10_000;
const SLOW_DOWN_FACTOR: f64 = 1.5;

/// 设备授权状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFlowState {
    Idle,
    Requesting,
    AwaitingUser,
    Polling,
    Succeeded,
    Failed,
    Expired,
}

/// 一次登录尝试的设备授权会话
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthorizationSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    /// 绝对过期时间（epoch 毫秒）
    pub expires_at: i64,
    pub poll_interval_ms: u64,
}

impl DeviceAuthorizationSession {
    /// 给用户打开的地址（优先带 user code 的完整地址）
    pub fn verification_target(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .unwrap_or(&self.verification_uri)
    }
}

/// 已拿到设备码、等待轮询的登录
///
/// 按值交给 `complete`，同一次登录不会出现两个轮询循环。
#[derive(Debug)]
pub struct PendingSignIn {
    session: DeviceAuthorizationSession,
    verifier: PkceVerifier,
    deadline: Instant,
}

impl PendingSignIn {
    pub fn session(&self) -> &DeviceAuthorizationSession {
        &self.session
    }
}

/// `slow_down` 之后的轮询间隔
pub fn slow_down_interval(current_ms: u64) -> u64 {
    ((current_ms as f64 * SLOW_DOWN_FACTOR) as u64).min(MAX_POLL_INTERVAL_MS)
}

/// 单个 Provider 的设备授权流程
pub struct DeviceAuthorizationFlow {
    provider: ProviderKind,
    endpoints: Arc<dyn OAuthEndpoints>,
    store: Arc<CredentialStore>,
    state: Mutex<DeviceFlowState>,
}

impl DeviceAuthorizationFlow {
    pub fn new(
        provider: ProviderKind,
        endpoints: Arc<dyn OAuthEndpoints>,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            provider,
            endpoints,
            store,
            state: Mutex::new(DeviceFlowState::Idle),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn state(&self) -> DeviceFlowState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn transition(&self, next: DeviceFlowState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        tracing::debug!(provider = %self.provider, from = ?*state, to = ?next, "device flow transition");
        *state = next;
    }

    /// 完整登录：申请设备码 → 通知调用方 → 轮询直到终态
    pub async fn sign_in<F>(&self, on_prompt: F) -> Result<TokenBundle>
    where
        F: FnOnce(&DeviceAuthorizationSession),
    {
        let pending = self.start().await?;
        on_prompt(pending.session());
        self.complete(pending).await
    }

    /// `Idle → Requesting → AwaitingUser`
    pub async fn start(&self) -> Result<PendingSignIn> {
        self.transition(DeviceFlowState::Requesting);

        let verifier = PkceVerifier::generate();
        let challenge = verifier.challenge();
        let resp = match self.endpoints.request_device_code(&challenge).await {
            Ok(resp) => resp,
            Err(e) => {
                self.transition(DeviceFlowState::Failed);
                return Err(e);
            }
        };

        let poll_interval_ms = resp
            .interval
            .map(|secs| secs.saturating_mul(1000))
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        let session = DeviceAuthorizationSession {
            device_code: resp.device_code,
            user_code: resp.user_code,
            verification_uri: resp.verification_uri,
            verification_uri_complete: resp.verification_uri_complete,
            expires_at: now_ms().saturating_add((resp.expires_in as i64).saturating_mul(1000)),
            poll_interval_ms,
        };

        self.transition(DeviceFlowState::AwaitingUser);
        tracing::info!(
            provider = %self.provider,
            user_code = %session.user_code,
            "device authorization requested, waiting for user approval"
        );

        Ok(PendingSignIn {
            session,
            verifier,
            deadline: Instant::now() + Duration::from_secs(resp.expires_in),
        })
    }

    /// `AwaitingUser → Polling → 终态`
    pub async fn complete(&self, pending: PendingSignIn) -> Result<TokenBundle> {
        self.transition(DeviceFlowState::Polling);

        let PendingSignIn {
            session,
            verifier,
            deadline,
        } = pending;
        let mut interval_ms = session.poll_interval_ms;

        loop {
            if Instant::now() >= deadline {
                self.transition(DeviceFlowState::Expired);
                return Err(SwitchboardError::DeviceFlowExpired(format!(
                    "{} sign-in timed out before approval, start again",
                    self.provider
                )));
            }

            match self.endpoints.poll_token(&session.device_code, &verifier).await {
                Err(e) => {
                    tracing::warn!(provider = %self.provider, "device token poll failed, retrying: {e}");
                }
                Ok(resp) => {
                    let error = resp.error.clone();
                    let message = resp.error_message();
                    if let Some(bundle) = resp.into_bundle(now_ms(), None) {
                        if let Err(e) = self.store.set_token(self.provider, bundle.clone()) {
                            self.transition(DeviceFlowState::Failed);
                            return Err(e);
                        }
                        self.transition(DeviceFlowState::Succeeded);
                        tracing::info!(provider = %self.provider, "device authorization succeeded");
                        return Ok(bundle);
                    }

                    match error.as_deref() {
                        Some("authorization_pending") => {
                            tracing::debug!(provider = %self.provider, "authorization pending");
                        }
                        Some("slow_down") => {
                            interval_ms = slow_down_interval(interval_ms);
                            tracing::debug!(provider = %self.provider, interval_ms, "server asked to slow down");
                        }
                        Some("expired_token") => {
                            self.transition(DeviceFlowState::Expired);
                            return Err(SwitchboardError::DeviceFlowExpired(message));
                        }
                        _ => {
                            self.transition(DeviceFlowState::Failed);
                            return Err(SwitchboardError::DeviceFlowRejected(message));
                        }
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
    }
}
