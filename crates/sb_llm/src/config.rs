//! 网关配置
//!
//! 默认值可直接使用；`<data_dir>/config.json` 存在时覆盖默认值（缺失字段沿用默认），
//! 最后再应用环境变量：
//!   SWITCHBOARD_HOME=/path/to/dir   数据目录（凭据文件、配置文件）
//!   SWITCHBOARD_PROVIDER=qwen       首选 Provider

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sb_core::{ProviderKind, Result, SwitchboardError};

const ENV_HOME: &str = "SWITCHBOARD_HOME";
const ENV_PROVIDER: &str = "SWITCHBOARD_PROVIDER";
const DATA_DIR_NAME: &str = ".switchboard";
const CONFIG_FILE_NAME: &str = "config.json";
const CREDENTIALS_FILE_NAME: &str = "credentials.json";

// Qwen 公共设备授权客户端（无 client secret，依赖 PKCE）
const QWEN_DEVICE_CODE_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/device/code";
const QWEN_TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const QWEN_CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";
const QWEN_SCOPE: &str = "openid profile email model.completion";

/// 单个 Provider 的连接配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// 默认请求源（OAuth token 的 resource URL 可覆盖）
    pub base_url: String,
    /// 默认模型
    pub model: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    120
}

impl ProviderSettings {
    pub fn defaults_for(kind: ProviderKind) -> Self {
        let (base_url, model) = match kind {
            ProviderKind::Qwen => (
                "https://dashscope.aliyuncs.com/compatible-mode/v1",
                "qwen3-coder-plus",
            ),
            ProviderKind::Ollama => ("https://ollama.com", "gpt-oss:120b"),
            ProviderKind::OpenAi => ("https://api.openai.com/v1", "gpt-4o-mini"),
            ProviderKind::DeepSeek => ("https://api.deepseek.com/v1", "deepseek-chat"),
        };
        Self {
            base_url: base_url.to_string(),
            model: model.to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// OAuth 设备授权端点配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthSettings {
    pub device_code_url: String,
    pub token_url: String,
    pub client_id: String,
    pub scope: String,
}

impl OAuthSettings {
    pub fn qwen() -> Self {
        Self {
            device_code_url: QWEN_DEVICE_CODE_URL.to_string(),
            token_url: QWEN_TOKEN_URL.to_string(),
            client_id: QWEN_CLIENT_ID.to_string(),
            scope: QWEN_SCOPE.to_string(),
        }
    }
}

/// 网关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 数据目录
    pub data_dir: PathBuf,
    /// 凭据文件；为空时使用 `<data_dir>/credentials.json`
    pub credentials_file: Option<PathBuf>,
    /// 首选 Provider（排在默认顺序之前）
    pub preferred_provider: Option<ProviderKind>,
    /// 默认候选顺序
    pub provider_order: Vec<ProviderKind>,
    /// 各 Provider 的连接配置（缺失的 Provider 使用内置默认）
    pub providers: HashMap<ProviderKind, ProviderSettings>,
    pub qwen_oauth: OAuthSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            credentials_file: None,
            preferred_provider: None,
            provider_order: ProviderKind::ALL.to_vec(),
            providers: ProviderKind::ALL
                .iter()
                .map(|kind| (*kind, ProviderSettings::defaults_for(*kind)))
                .collect(),
            qwen_oauth: OAuthSettings::qwen(),
        }
    }
}

impl GatewayConfig {
    /// 加载配置：默认值 → `<data_dir>/config.json` → 环境变量
    pub fn load() -> Result<Self> {
        let data_dir = std::env::var(ENV_HOME)
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());
        let path = data_dir.join(CONFIG_FILE_NAME);

        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.data_dir = data_dir;
        config.apply_env()?;
        Ok(config)
    }

    /// 从指定文件加载（不应用环境变量）
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SwitchboardError::Config(format!("read {} failed: {e}", path.display()))
        })?;
        let mut config: Self = serde_json::from_str(&content).map_err(|e| {
            SwitchboardError::Config(format!("parse {} failed: {e}", path.display()))
        })?;
        config.fill_missing_providers();
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var(ENV_PROVIDER) {
            if !raw.trim().is_empty() {
                self.preferred_provider = Some(raw.parse()?);
            }
        }
        Ok(())
    }

    fn fill_missing_providers(&mut self) {
        for kind in ProviderKind::ALL {
            self.providers
                .entry(kind)
                .or_insert_with(|| ProviderSettings::defaults_for(kind));
        }
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credentials_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(CREDENTIALS_FILE_NAME))
    }

    pub fn provider(&self, kind: ProviderKind) -> ProviderSettings {
        self.providers
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| ProviderSettings::defaults_for(kind))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DATA_DIR_NAME)
}
