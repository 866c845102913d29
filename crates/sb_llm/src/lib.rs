//! # sb_llm - Switchboard Provider Gateway
//!
//! Provider 网关层：凭据生命周期（API Key / OAuth token 刷新 / 设备授权登录）、
//! 带授权感知的降级调用链、NDJSON 与 SSE 流式归一化、结构化 JSON 提取。

pub mod auth;
pub mod config;
pub mod extract;
pub mod fallback;
pub mod gateway;
pub mod provider;
pub mod request;
pub mod session;
pub mod stream;

pub use auth::{CredentialStore, DeviceAuthorizationSession, TokenBundle, TokenRefreshPolicy};
pub use config::{GatewayConfig, OAuthSettings, ProviderSettings};
pub use extract::{extract, extract_as};
pub use fallback::CandidateList;
pub use gateway::Gateway;
pub use provider::{ProviderClient, ProviderRegistry};
pub use request::{ChatMessage, GenerationRequest, Role};
pub use session::{ProviderStatus, Session};
pub use stream::{normalize_stream, ChunkCallback, FrameDialect, StreamOutcome};

pub use sb_core::{GenerationResult, ProviderKind, Result, StreamResult, SwitchboardError};
