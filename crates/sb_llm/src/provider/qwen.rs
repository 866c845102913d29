//! Qwen Provider
//!
//! 通过设备授权登录后走 token 的 resource URL（如 `https://portal.qwen.ai/v1`），
//! 使用 API Key 时走配置的 DashScope 兼容接口。模型列表为静态列表，
//! portal 端不提供 `/models`。

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use sb_core::{GenerationResult, ProviderKind, Result};

use super::openai_compat::OpenAiCompatProvider;
use super::ProviderClient;
use crate::auth::TokenRefreshPolicy;
use crate::config::ProviderSettings;
use crate::request::GenerationRequest;
use crate::stream::ChunkCallback;

pub const QWEN_MODELS: &[&str] = &["qwen3-coder-plus", "qwen3-coder-flash", "vision-model"];

pub struct QwenProvider {
    inner: OpenAiCompatProvider,
}

impl QwenProvider {
    pub fn new(settings: ProviderSettings, auth: Arc<TokenRefreshPolicy>) -> Self {
        Self {
            inner: OpenAiCompatProvider::new(ProviderKind::Qwen, settings, auth),
        }
    }
}

#[async_trait]
impl ProviderClient for QwenProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Qwen
    }

    fn is_authenticated(&self) -> bool {
        self.inner.is_authenticated()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        self.inner.generate(request).await
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        on_chunk: ChunkCallback,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        self.inner.generate_streaming(request, on_chunk, cancel).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let mut models: Vec<String> = QWEN_MODELS.iter().map(|m| m.to_string()).collect();
        let configured = &self.inner.settings().model;
        if !models.contains(configured) {
            models.insert(0, configured.clone());
        }
        Ok(models)
    }
}
