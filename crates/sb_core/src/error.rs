//! 全局错误处理机制
//!
//! 网关本身从不向调用方抛错（见 `sb_llm::gateway`），这里的分类主要服务于
//! 设备授权流程、结构化提取，以及 Provider 内部的失败信息汇总。

use thiserror::Error;

/// Switchboard 统一错误类型
#[derive(Error, Debug)]
pub enum SwitchboardError {
    /// 没有配置任何凭据
    #[error("No credentials configured for {0}: add an API key or sign in first")]
    AuthenticationMissing(String),

    /// Token 已过期且无法刷新，凭据已被清除
    #[error("Authentication expired: {0}")]
    AuthenticationExpired(String),

    #[error("Provider request failed: {0}")]
    ProviderRequestFailed(String),

    /// 单个流式帧解析失败（只记录日志，不中断流）
    #[error("Malformed stream frame: {0}")]
    StreamFrameMalformed(String),

    #[error("Structured extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Device authorization expired: {0}")]
    DeviceFlowExpired(String),

    #[error("Device authorization rejected: {0}")]
    DeviceFlowRejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SwitchboardError {
    /// 是否需要用户重新登录 / 重新配置凭据
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationMissing(_)
                | Self::AuthenticationExpired(_)
                | Self::DeviceFlowExpired(_)
                | Self::DeviceFlowRejected(_)
        )
    }
}

/// 统一 Result 类型别名
pub type Result<T> = std::result::Result<T, SwitchboardError>;
