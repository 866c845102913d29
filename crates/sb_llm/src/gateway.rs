//! 网关：按候选顺序降级调用 Provider
//!
//! 负责：
//! - 构建候选列表（显式 Provider 或 首选 + 默认顺序）
//! - 依次尝试已配置凭据的 Provider，第一个成功即返回
//! - 把所有失败汇总为一个 `GenerationResult`，不向调用方抛错
//!
//! 同一时刻只有一个 Provider 调用在进行中。

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_core::{GenerationResult, ProviderKind, Result, StreamResult, SwitchboardError};

use crate::config::GatewayConfig;
use crate::extract::extract;
use crate::fallback::CandidateList;
use crate::provider::http::ABORTED;
use crate::provider::{ProviderClient, ProviderRegistry};
use crate::request::GenerationRequest;
use crate::stream::ChunkCallback;

pub struct Gateway {
    registry: ProviderRegistry,
    preferred: Option<ProviderKind>,
    order: Vec<ProviderKind>,
}

impl Gateway {
    pub fn new(
        registry: ProviderRegistry,
        preferred: Option<ProviderKind>,
        order: Vec<ProviderKind>,
    ) -> Self {
        Self {
            registry,
            preferred,
            order,
        }
    }

    pub fn from_config(config: &GatewayConfig, registry: ProviderRegistry) -> Self {
        Self::new(
            registry,
            config.preferred_provider,
            config.provider_order.clone(),
        )
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// 本次调用的候选列表
    pub fn candidates(&self, explicit: Option<ProviderKind>) -> CandidateList {
        match explicit {
            Some(provider) => CandidateList::explicit(provider),
            None => CandidateList::from_preferences(self.preferred, &self.order),
        }
    }

    /// 按候选顺序执行 `operation`
    ///
    /// 跳过未配置凭据的 Provider；`Err` 与失败结果都记为最近错误并继续下一个；
    /// 取消后不再尝试新的候选。
    pub async fn invoke<F, Fut>(
        &self,
        candidates: &CandidateList,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> GenerationResult
    where
        F: FnMut(Arc<dyn ProviderClient>) -> Fut,
        Fut: Future<Output = Result<GenerationResult>>,
    {
        let aborted = || cancel.is_some_and(CancellationToken::is_cancelled);
        let mut last_error: Option<String> = None;

        for kind in candidates.iter() {
            if aborted() {
                return GenerationResult::failure(ABORTED);
            }

            let Some(client) = self.registry.get(kind) else {
                tracing::debug!(provider = %kind, "no client registered, skipping");
                continue;
            };
            if !client.is_authenticated() {
                tracing::debug!(provider = %kind, "not authenticated, skipping");
                continue;
            }

            tracing::info!(provider = %kind, "invoking provider");
            let error = match operation(client).await {
                Ok(result) if result.is_success() => return result,
                Ok(result) => result.error().unwrap_or("unknown error").to_string(),
                Err(e) => e.to_string(),
            };

            if aborted() {
                tracing::info!(provider = %kind, "request aborted");
                return GenerationResult::failure(ABORTED);
            }
            tracing::warn!(provider = %kind, "provider failed: {error}");
            last_error = Some(error);
        }

        match last_error {
            Some(error) => GenerationResult::failure(format!("All providers failed: {error}")),
            None => GenerationResult::failure(format!(
                "No AI provider is configured. Add an API key or sign in to one of: {}",
                candidates.describe()
            )),
        }
    }

    /// 非流式生成
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        explicit_provider: Option<ProviderKind>,
        explicit_model: Option<&str>,
    ) -> GenerationResult {
        let request = with_explicit_model(request, explicit_model);
        let candidates = self.candidates(explicit_provider);

        self.invoke(&candidates, None, |client| {
            let request = request.clone();
            async move { client.generate(&request).await }
        })
        .await
    }

    /// 流式生成；文本经 `on_chunk` 交付，结果不带 data
    pub async fn generate_streaming(
        &self,
        request: &GenerationRequest,
        on_chunk: ChunkCallback,
        cancel: CancellationToken,
        explicit_provider: Option<ProviderKind>,
        explicit_model: Option<&str>,
    ) -> StreamResult {
        let request = with_explicit_model(request, explicit_model);
        let candidates = self.candidates(explicit_provider);

        self.invoke(&candidates, Some(&cancel), |client| {
            let request = request.clone();
            let on_chunk = on_chunk.clone();
            let cancel = cancel.clone();
            async move { client.generate_streaming(&request, on_chunk, &cancel).await }
        })
        .await
        .into_stream_result()
    }

    /// 生成并提取 JSON
    pub async fn generate_structured(
        &self,
        request: &GenerationRequest,
        explicit_provider: Option<ProviderKind>,
        explicit_model: Option<&str>,
    ) -> Result<Value> {
        let candidates = self.candidates(explicit_provider);
        if !candidates.iter().any(|kind| self.is_ready(kind)) {
            return Err(SwitchboardError::AuthenticationMissing(candidates.describe()));
        }

        let result = self
            .generate(request, explicit_provider, explicit_model)
            .await;
        if !result.is_success() {
            return Err(SwitchboardError::ProviderRequestFailed(
                result.error().unwrap_or("unknown error").to_string(),
            ));
        }
        extract(&result.into_data().unwrap_or_default())
    }

    fn is_ready(&self, kind: ProviderKind) -> bool {
        self.registry
            .get(kind)
            .is_some_and(|client| client.is_authenticated())
    }

    /// 列出某个 Provider 的模型
    pub async fn list_models(&self, provider: ProviderKind) -> Result<Vec<String>> {
        let client = self.registry.get(provider).ok_or_else(|| {
            SwitchboardError::Config(format!("no client registered for {provider}"))
        })?;
        if !client.is_authenticated() {
            return Err(SwitchboardError::AuthenticationMissing(provider.to_string()));
        }
        client.list_models().await
    }
}

fn with_explicit_model(request: &GenerationRequest, model: Option<&str>) -> GenerationRequest {
    match model.map(str::trim).filter(|m| !m.is_empty()) {
        Some(model) => request.clone().with_model(model),
        None => request.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use ProviderKind::*;

    enum Behavior {
        Succeed(&'static str),
        Fail(&'static str),
        Error(&'static str),
        /// 流式交付这些片段后成功
        Chunks(&'static [&'static str]),
        /// 交付一个片段后触发取消
        CancelAfterFirst(&'static [&'static str]),
    }

    struct FakeProvider {
        kind: ProviderKind,
        authenticated: bool,
        behavior: Behavior,
        calls: AtomicUsize,
        models_seen: Mutex<Vec<Option<String>>>,
    }

    impl FakeProvider {
        fn new(kind: ProviderKind, authenticated: bool, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                kind,
                authenticated,
                behavior,
                calls: AtomicUsize::new(0),
                models_seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn record(&self, request: &GenerationRequest) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.models_seen
                .lock()
                .unwrap()
                .push(request.model().map(str::to_string));
        }

        fn plain_result(&self) -> Result<GenerationResult> {
            match self.behavior {
                Behavior::Succeed(data) => Ok(GenerationResult::ok(data)),
                Behavior::Fail(error) => Ok(GenerationResult::failure(error)),
                Behavior::Error(msg) => Err(SwitchboardError::ProviderRequestFailed(msg.into())),
                Behavior::Chunks(parts) | Behavior::CancelAfterFirst(parts) => {
                    Ok(GenerationResult::ok(parts.concat()))
                }
            }
        }
    }

    #[async_trait]
    impl ProviderClient for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        fn is_authenticated(&self) -> bool {
            self.authenticated
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
            self.record(request);
            self.plain_result()
        }

        async fn generate_streaming(
            &self,
            request: &GenerationRequest,
            on_chunk: ChunkCallback,
            cancel: &CancellationToken,
        ) -> Result<GenerationResult> {
            self.record(request);
            match self.behavior {
                Behavior::Chunks(parts) => {
                    for part in parts {
                        on_chunk(*part);
                    }
                    Ok(GenerationResult::ok(parts.concat()))
                }
                Behavior::CancelAfterFirst(parts) => {
                    on_chunk(parts[0]);
                    cancel.cancel();
                    Ok(GenerationResult::failure(ABORTED))
                }
                _ => self.plain_result(),
            }
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec![format!("{}-model", self.kind)])
        }
    }

    fn gateway(providers: &[Arc<FakeProvider>]) -> Gateway {
        let mut registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(provider.clone());
        }
        Gateway::new(registry, None, vec![Qwen, Ollama, OpenAi, DeepSeek])
    }

    fn collector() -> (Arc<Mutex<Vec<String>>>, ChunkCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ChunkCallback = Arc::new(move |text: &str| {
            sink.lock().unwrap().push(text.to_string());
        });
        (seen, callback)
    }

    #[tokio::test]
    async fn test_only_authenticated_candidate_is_called() {
        let a = FakeProvider::new(Qwen, false, Behavior::Succeed("a"));
        let b = FakeProvider::new(Ollama, true, Behavior::Succeed("b"));
        let c = FakeProvider::new(OpenAi, false, Behavior::Succeed("c"));
        let gw = gateway(&[a.clone(), b.clone(), c.clone()]);

        let result = gw
            .generate(&GenerationRequest::prompt("hi"), None, None)
            .await;

        assert_eq!(result, GenerationResult::ok("b"));
        assert_eq!((a.calls(), b.calls(), c.calls()), (0, 1, 0));
    }

    #[tokio::test]
    async fn test_first_success_stops_the_chain() {
        let a = FakeProvider::new(Qwen, true, Behavior::Fail("quota exceeded"));
        let b = FakeProvider::new(Ollama, true, Behavior::Succeed("b"));
        let c = FakeProvider::new(OpenAi, true, Behavior::Succeed("c"));
        let gw = gateway(&[a.clone(), b.clone(), c.clone()]);

        let result = gw
            .generate(&GenerationRequest::prompt("hi"), None, None)
            .await;

        assert_eq!(result.data(), Some("b"));
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 0));
    }

    #[tokio::test]
    async fn test_aggregated_failure_names_last_error() {
        let a = FakeProvider::new(Qwen, true, Behavior::Fail("qwen quota exceeded"));
        let b = FakeProvider::new(Ollama, true, Behavior::Error("ollama failed: 502 Bad Gateway"));
        let gw = gateway(&[a, b]);

        let result = gw
            .generate(&GenerationRequest::prompt("hi"), None, None)
            .await;

        assert!(!result.is_success());
        let error = result.error().unwrap();
        assert!(error.starts_with("All providers failed: "));
        assert!(error.contains("ollama failed: 502 Bad Gateway"));
        assert!(!error.contains("qwen quota"));
    }

    #[tokio::test]
    async fn test_nothing_authenticated_prompts_configuration() {
        let a = FakeProvider::new(Qwen, false, Behavior::Succeed("a"));
        let b = FakeProvider::new(Ollama, false, Behavior::Succeed("b"));
        let gw = gateway(&[a, b]);

        let candidates: CandidateList = [Qwen, Ollama].into_iter().collect();
        let result = gw
            .invoke(&candidates, None, |client| async move {
                client.generate(&GenerationRequest::prompt("hi")).await
            })
            .await;

        let error = result.error().unwrap();
        assert!(error.starts_with("No AI provider is configured"));
        assert!(error.ends_with("qwen, ollama"));
    }

    #[tokio::test]
    async fn test_qwen_unauthenticated_falls_back_to_ollama_json() {
        let qwen = FakeProvider::new(Qwen, false, Behavior::Succeed("unused"));
        let ollama = FakeProvider::new(Ollama, true, Behavior::Succeed("{\"x\":1}"));
        let gw = gateway(&[qwen.clone(), ollama]);

        let candidates: CandidateList = [Qwen, Ollama].into_iter().collect();
        let result = gw
            .invoke(&candidates, None, |client| async move {
                client.generate(&GenerationRequest::prompt("give me x")).await
            })
            .await;

        assert_eq!(result, GenerationResult::ok("{\"x\":1}"));
        assert_eq!(extract(result.data().unwrap()).unwrap(), json!({"x": 1}));
        assert_eq!(qwen.calls(), 0);
    }

    #[tokio::test]
    async fn test_explicit_provider_and_model() {
        let qwen = FakeProvider::new(Qwen, true, Behavior::Succeed("q"));
        let deepseek = FakeProvider::new(DeepSeek, true, Behavior::Succeed("d"));
        let gw = gateway(&[qwen.clone(), deepseek.clone()]);

        let result = gw
            .generate(
                &GenerationRequest::prompt("hi"),
                Some(DeepSeek),
                Some("deepseek-reasoner"),
            )
            .await;

        assert_eq!(result.data(), Some("d"));
        assert_eq!(qwen.calls(), 0);
        assert_eq!(
            *deepseek.models_seen.lock().unwrap(),
            vec![Some("deepseek-reasoner".to_string())]
        );
    }

    #[tokio::test]
    async fn test_preferred_provider_goes_first() {
        let qwen = FakeProvider::new(Qwen, true, Behavior::Succeed("q"));
        let ollama = FakeProvider::new(Ollama, true, Behavior::Succeed("o"));
        let mut registry = ProviderRegistry::new();
        registry.register(qwen.clone());
        registry.register(ollama.clone());
        let gw = Gateway::new(registry, Some(Ollama), vec![Qwen, Ollama]);

        let result = gw
            .generate(&GenerationRequest::prompt("hi"), None, None)
            .await;
        assert_eq!(result.data(), Some("o"));
        assert_eq!(qwen.calls(), 0);
    }

    #[tokio::test]
    async fn test_streaming_result_has_no_data() {
        let qwen = FakeProvider::new(Qwen, true, Behavior::Chunks(&["He", "llo"]));
        let gw = gateway(&[qwen]);
        let (seen, callback) = collector();

        let result = gw
            .generate_streaming(
                &GenerationRequest::prompt("hi"),
                callback,
                CancellationToken::new(),
                None,
                None,
            )
            .await;

        assert_eq!(
            result,
            StreamResult {
                success: true,
                error: None
            }
        );
        assert_eq!(*seen.lock().unwrap(), vec!["He", "llo"]);
    }

    #[tokio::test]
    async fn test_abort_does_not_advance_to_next_candidate() {
        let qwen = FakeProvider::new(Qwen, true, Behavior::CancelAfterFirst(&["first", "second"]));
        let ollama = FakeProvider::new(Ollama, true, Behavior::Chunks(&["other"]));
        let gw = gateway(&[qwen, ollama.clone()]);
        let (seen, callback) = collector();

        let result = gw
            .generate_streaming(
                &GenerationRequest::prompt("hi"),
                callback,
                CancellationToken::new(),
                None,
                None,
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(ABORTED));
        assert_eq!(*seen.lock().unwrap(), vec!["first"]);
        assert_eq!(ollama.calls(), 0);
    }

    #[tokio::test]
    async fn test_generate_structured() {
        let qwen = FakeProvider::new(
            Qwen,
            true,
            Behavior::Succeed("Here you go:\n```json\n{\"ok\": true}\n```"),
        );
        let gw = gateway(&[qwen]);
        let value = gw
            .generate_structured(&GenerationRequest::prompt("hi"), None, None)
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));

        let prose = FakeProvider::new(Ollama, true, Behavior::Succeed("no json here"));
        let gw = gateway(&[prose]);
        let err = gw
            .generate_structured(&GenerationRequest::prompt("hi"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::ExtractionFailed(_)));

        let gw = gateway(&[]);
        let err = gw
            .generate_structured(&GenerationRequest::prompt("hi"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::AuthenticationMissing(_)));
        assert_eq!(
            err.to_string(),
            "No credentials configured for qwen, ollama, openai, deepseek: add an API key or sign in first"
        );

        let qwen = FakeProvider::new(Qwen, true, Behavior::Fail("quota exceeded"));
        let gw = gateway(&[qwen]);
        let err = gw
            .generate_structured(&GenerationRequest::prompt("hi"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::ProviderRequestFailed(_)));
        assert!(err.to_string().contains("All providers failed: quota exceeded"));
    }

    #[tokio::test]
    async fn test_list_models_requires_credentials() {
        let qwen = FakeProvider::new(Qwen, true, Behavior::Succeed(""));
        let ollama = FakeProvider::new(Ollama, false, Behavior::Succeed(""));
        let gw = gateway(&[qwen, ollama]);

        assert_eq!(gw.list_models(Qwen).await.unwrap(), vec!["qwen-model"]);
        assert!(matches!(
            gw.list_models(Ollama).await.unwrap_err(),
            SwitchboardError::AuthenticationMissing(_)
        ));
        assert!(matches!(
            gw.list_models(DeepSeek).await.unwrap_err(),
            SwitchboardError::Config(_)
        ));
    }
}
