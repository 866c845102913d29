//! Ollama Provider
//!
//! - `POST {base}/api/chat`，body `{model, messages, stream}`
//! - 非流式读 `message.content`
//! - 流式为 NDJSON，每行一个 `{"message": {"content": ...}, "done": bool}`
//! - `GET {base}/api/tags` → `models[].name`
//!
//! Ollama Cloud 需要 API Key（bearer）；本地实例忽略该头。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_core::{GenerationResult, ProviderKind, Result};

use super::http::{self, build_client, join_url};
use super::ProviderClient;
use crate::auth::TokenRefreshPolicy;
use crate::config::ProviderSettings;
use crate::request::GenerationRequest;
use crate::stream::{normalize_stream, ChunkCallback, FrameDialect};

const KIND: ProviderKind = ProviderKind::Ollama;

/// 非流式响应 → 统一结果
pub fn map_chat_response(json: &Value) -> GenerationResult {
    if let Some(err) = json.get("error").and_then(Value::as_str) {
        return GenerationResult::failure(format!("ollama returned an error: {err}"));
    }
    match json.pointer("/message/content").and_then(Value::as_str) {
        Some(content) if !content.is_empty() => GenerationResult::ok(content),
        _ => GenerationResult::failure("ollama chat: response contained no content"),
    }
}

/// NDJSON 帧中的文本增量
pub fn ndjson_delta(frame: &Value) -> Option<String> {
    frame
        .pointer("/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `/api/tags` 响应 → 模型名列表
pub fn parse_tags(json: &Value) -> Vec<String> {
    json["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub struct OllamaProvider {
    settings: ProviderSettings,
    auth: Arc<TokenRefreshPolicy>,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(settings: ProviderSettings, auth: Arc<TokenRefreshPolicy>) -> Self {
        let client = build_client(&settings);
        Self {
            settings,
            auth,
            client,
        }
    }

    async fn endpoint(&self) -> Result<(String, String)> {
        let resolved = self.auth.resolve_auth(KIND).await?;
        let base = resolved
            .base_url_override
            .unwrap_or_else(|| self.settings.base_url.clone());
        Ok((base, resolved.bearer))
    }
}

#[async_trait]
impl ProviderClient for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    fn is_authenticated(&self) -> bool {
        self.auth.store().is_authenticated(KIND)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (base, bearer) = self.endpoint().await?;
        let body = request.to_chat_body(&self.settings.model, false);

        let req = self
            .client
            .post(join_url(&base, "api/chat"))
            .bearer_auth(&bearer)
            .json(&body);
        let resp = http::send(KIND, "chat", req).await?;
        let json = http::read_json(KIND, "chat", resp).await?;
        Ok(map_chat_response(&json))
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        on_chunk: ChunkCallback,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let (base, bearer) = self.endpoint().await?;
        let body = request.to_chat_body(&self.settings.model, true);

        let req = self
            .client
            .post(join_url(&base, "api/chat"))
            .bearer_auth(&bearer)
            .json(&body);
        let Some(resp) = http::send_cancellable(KIND, "chat", req, cancel).await? else {
            return Ok(GenerationResult::failure(http::ABORTED));
        };

        let outcome = normalize_stream(
            resp.bytes_stream(),
            FrameDialect::NdJson,
            ndjson_delta,
            on_chunk.as_ref(),
            cancel,
        )
        .await?;
        Ok(http::outcome_to_result(KIND, outcome))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let (base, bearer) = self.endpoint().await?;
        let req = self.client.get(join_url(&base, "api/tags")).bearer_auth(&bearer);
        let resp = http::send(KIND, "list models", req).await?;
        let json = http::read_json(KIND, "list models", resp).await?;
        Ok(parse_tags(&json))
    }
}
