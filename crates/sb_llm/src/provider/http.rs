//! Provider 共用的 HTTP 辅助

use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use sb_core::{GenerationResult, ProviderKind, Result, SwitchboardError};

use crate::config::ProviderSettings;
use crate::stream::StreamOutcome;

/// 流被取消时的失败信息
pub const ABORTED: &str = "request aborted";

pub(crate) fn build_client(settings: &ProviderSettings) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(settings.timeout())
        .build()
        .unwrap_or_default()
}

/// 拼接 base URL 与路径
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// 发送请求；网络错误与非 2xx 都转为 `ProviderRequestFailed`
pub(crate) async fn send(kind: ProviderKind, action: &str, request: RequestBuilder) -> Result<Response> {
    let resp = request.send().await.map_err(|e| {
        SwitchboardError::ProviderRequestFailed(format!("{kind} {action}: request failed: {e}"))
    })?;
    check_status(kind, action, resp).await
}

/// 可取消的发送；取消时返回 `None`
pub(crate) async fn send_cancellable(
    kind: ProviderKind,
    action: &str,
    request: RequestBuilder,
    cancel: &CancellationToken,
) -> Result<Option<Response>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        resp = send(kind, action, request) => resp.map(Some),
    }
}

async fn check_status(kind: ProviderKind, action: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(SwitchboardError::ProviderRequestFailed(format!(
        "{kind} {action} failed: {} - {}",
        status,
        text.trim()
    )))
}

pub(crate) async fn read_json(kind: ProviderKind, action: &str, resp: Response) -> Result<Value> {
    resp.json().await.map_err(|e| {
        SwitchboardError::ProviderRequestFailed(format!("{kind} {action}: decode response failed: {e}"))
    })
}

/// 流式读取结果 → 统一结果；与非流式一致，没有内容也算失败
pub(crate) fn outcome_to_result(kind: ProviderKind, outcome: StreamOutcome) -> GenerationResult {
    if outcome.cancelled {
        return GenerationResult::failure(ABORTED);
    }
    if let Some(message) = outcome.error {
        return GenerationResult::failure(format!("{kind} returned an error: {message}"));
    }
    if outcome.text.is_empty() {
        return GenerationResult::failure(format!("{kind} chat: stream contained no content"));
    }
    GenerationResult::ok(outcome.text)
}
