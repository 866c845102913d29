//! Provider Client
//!
//! 所有 Provider 实现同一个 [`ProviderClient`] trait，网关据此统一调度。
//! 每种线上格式各有一个响应映射函数，返回统一的 [`GenerationResult`]。

pub mod http;
pub mod ollama;
pub mod openai_compat;
pub mod qwen;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use sb_core::{GenerationResult, ProviderKind, Result};

use crate::auth::TokenRefreshPolicy;
use crate::config::GatewayConfig;
use crate::request::GenerationRequest;
use crate::stream::ChunkCallback;

pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use qwen::QwenProvider;

/// Provider 能力接口
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// 是否配置了凭据（不检查过期）
    fn is_authenticated(&self) -> bool;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult>;

    /// 流式生成；文本经 `on_chunk` 交付，成功结果的 data 为完整文本
    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        on_chunk: ChunkCallback,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult>;

    async fn list_models(&self) -> Result<Vec<String>>;
}

/// 每个 Provider 一个客户端
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: BTreeMap<ProviderKind, Arc<dyn ProviderClient>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置构建全部内置 Provider，共享同一个刷新策略（及其凭据存储）
    pub fn from_config(config: &GatewayConfig, auth: Arc<TokenRefreshPolicy>) -> Self {
        let mut registry = Self::new();
        for kind in ProviderKind::ALL {
            let settings = config.provider(kind);
            let client: Arc<dyn ProviderClient> = match kind {
                ProviderKind::Qwen => Arc::new(QwenProvider::new(settings, auth.clone())),
                ProviderKind::Ollama => Arc::new(OllamaProvider::new(settings, auth.clone())),
                ProviderKind::OpenAi | ProviderKind::DeepSeek => {
                    Arc::new(OpenAiCompatProvider::new(kind, settings, auth.clone()))
                }
            };
            registry.register(client);
        }
        registry
    }

    /// 注册（或替换）一个客户端
    pub fn register(&mut self, client: Arc<dyn ProviderClient>) {
        self.clients.insert(client.kind(), client);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderClient>> {
        self.clients.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.clients.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialStore;

    #[test]
    fn test_registry_covers_all_providers() {
        let store = Arc::new(CredentialStore::in_memory());
        let auth = Arc::new(TokenRefreshPolicy::new(store.clone()));
        let registry = ProviderRegistry::from_config(&GatewayConfig::default(), auth);

        assert_eq!(registry.kinds(), ProviderKind::ALL.to_vec());
        let deepseek = registry.get(ProviderKind::DeepSeek).unwrap();
        assert_eq!(deepseek.kind(), ProviderKind::DeepSeek);
        assert!(!deepseek.is_authenticated());

        store.set_api_key(ProviderKind::DeepSeek, "sk-test").unwrap();
        assert!(deepseek.is_authenticated());
    }
}
