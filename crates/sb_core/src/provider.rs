//! Provider 标识

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SwitchboardError;

/// 网关支持的 Provider
///
/// 序列化为小写标识（同时也是持久化凭据文件中的 key）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// 通义千问：OAuth 设备授权或 DashScope API Key
    Qwen,
    /// Ollama：NDJSON 流式协议
    Ollama,
    OpenAi,
    DeepSeek,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Qwen,
        ProviderKind::Ollama,
        ProviderKind::OpenAi,
        ProviderKind::DeepSeek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qwen => "qwen",
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
        }
    }

    /// 是否支持 OAuth 设备授权登录
    pub fn supports_device_flow(&self) -> bool {
        matches!(self, Self::Qwen)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = SwitchboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qwen" => Ok(Self::Qwen),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            "deepseek" => Ok(Self::DeepSeek),
            other => Err(SwitchboardError::Config(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}
