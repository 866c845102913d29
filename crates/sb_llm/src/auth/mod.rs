//! 凭据生命周期
//!
//! - `credential_store`：每个 Provider 的 API Key / OAuth token 持久化
//! - `refresh`：token 过期检测与刷新、请求凭据解析
//! - `device_flow`：PKCE 设备授权登录
//! - `oauth_client`：设备授权 / token / refresh 端点

pub mod credential_store;
pub mod device_flow;
pub mod oauth_client;
pub mod pkce;
pub mod refresh;
pub mod token;

pub use credential_store::{CredentialRecord, CredentialStore};
pub use device_flow::{
    DeviceAuthorizationFlow, DeviceAuthorizationSession, DeviceFlowState, PendingSignIn,
};
pub use oauth_client::{DeviceOAuthClient, OAuthEndpoints};
pub use refresh::{ResolvedAuth, TokenRefreshPolicy};
pub use token::TokenBundle;
