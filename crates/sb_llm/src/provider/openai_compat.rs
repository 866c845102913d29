//! OpenAI 兼容的 chat-completions 客户端
//!
//! Qwen（DashScope / portal）、OpenAI、DeepSeek 共用：
//! - `POST {base}/chat/completions`，body `{model, messages, stream}`
//! - 非流式读 `choices[0].message.content`
//! - 流式为 SSE，读 `choices[0].delta.content`
//! - `GET {base}/models` → `data[].id`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_core::{GenerationResult, ProviderKind, Result};

use super::http::{self, build_client, join_url};
use super::ProviderClient;
use crate::auth::{ResolvedAuth, TokenRefreshPolicy};
use crate::config::ProviderSettings;
use crate::request::GenerationRequest;
use crate::stream::{normalize_stream, ChunkCallback, FrameDialect};

/// 非流式响应 → 统一结果
pub fn map_chat_response(kind: ProviderKind, json: &Value) -> GenerationResult {
    if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return GenerationResult::failure(format!("{kind} returned an error: {message}"));
    }

    match json.pointer("/choices/0/message/content").and_then(Value::as_str) {
        Some(content) if !content.is_empty() => GenerationResult::ok(content),
        _ => GenerationResult::failure(format!("{kind} chat: response contained no content")),
    }
}

/// SSE 帧中的文本增量
pub fn sse_delta(frame: &Value) -> Option<String> {
    frame
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `/models` 响应 → 模型 id 列表
pub fn parse_model_list(json: &Value) -> Vec<String> {
    json["data"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// OpenAI 兼容 Provider
pub struct OpenAiCompatProvider {
    kind: ProviderKind,
    settings: ProviderSettings,
    auth: Arc<TokenRefreshPolicy>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(kind: ProviderKind, settings: ProviderSettings, auth: Arc<TokenRefreshPolicy>) -> Self {
        let client = build_client(&settings);
        Self {
            kind,
            settings,
            auth,
            client,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// 请求源与 bearer；OAuth token 的 resource URL 优先于配置的 base URL
    async fn endpoint(&self) -> Result<(String, String)> {
        let ResolvedAuth {
            bearer,
            base_url_override,
        } = self.auth.resolve_auth(self.kind).await?;
        let base = base_url_override.unwrap_or_else(|| self.settings.base_url.clone());
        Ok((base, bearer))
    }

    fn chat_request(&self, base: &str, bearer: &str, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(join_url(base, "chat/completions"))
            .bearer_auth(bearer)
            .header("Content-Type", "application/json")
            .json(body)
    }
}

#[async_trait]
impl ProviderClient for OpenAiCompatProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_authenticated(&self) -> bool {
        self.auth.store().is_authenticated(self.kind)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (base, bearer) = self.endpoint().await?;
        let body = request.to_chat_body(&self.settings.model, false);
        tracing::debug!(
            provider = %self.kind,
            model = request.model_or(&self.settings.model),
            "chat request"
        );

        let resp = http::send(self.kind, "chat", self.chat_request(&base, &bearer, &body)).await?;
        let json = http::read_json(self.kind, "chat", resp).await?;
        Ok(map_chat_response(self.kind, &json))
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        on_chunk: ChunkCallback,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let (base, bearer) = self.endpoint().await?;
        let body = request.to_chat_body(&self.settings.model, true);
        tracing::debug!(
            provider = %self.kind,
            model = request.model_or(&self.settings.model),
            "streaming chat request"
        );

        let req = self
            .chat_request(&base, &bearer, &body)
            .header("Accept", "text/event-stream");
        let Some(resp) = http::send_cancellable(self.kind, "chat", req, cancel).await? else {
            return Ok(GenerationResult::failure(http::ABORTED));
        };

        let outcome = normalize_stream(
            resp.bytes_stream(),
            FrameDialect::Sse,
            sse_delta,
            on_chunk.as_ref(),
            cancel,
        )
        .await?;
        Ok(http::outcome_to_result(self.kind, outcome))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let (base, bearer) = self.endpoint().await?;
        let request = self.client.get(join_url(&base, "models")).bearer_auth(&bearer);
        let resp = http::send(self.kind, "list models", request).await?;
        let json = http::read_json(self.kind, "list models", resp).await?;
        Ok(parse_model_list(&json))
    }
}
