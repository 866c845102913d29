//! 凭据存储
//!
//! 每个 Provider 一条记录（API Key 和/或 OAuth token bundle），整体序列化为一个
//! JSON 文件。构造时显式加载一次，之后只写不读。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use sb_core::{ProviderKind, Result};

use super::token::TokenBundle;

/// 单个 Provider 的凭据记录
///
/// 两者同时存在时，有效的 token 优先于 API Key（见 `auth::refresh::resolve_auth`）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenBundle>,
}

impl CredentialRecord {
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            token: None,
        }
    }

    pub fn oauth(token: TokenBundle) -> Self {
        Self {
            api_key: None,
            token: Some(token),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }

    pub fn has_token(&self) -> bool {
        self.token.as_ref().is_some_and(TokenBundle::has_access_token)
    }

    fn is_empty(&self) -> bool {
        self.api_key.is_none() && self.token.is_none()
    }
}

type Records = BTreeMap<ProviderKind, CredentialRecord>;

/// 凭据存储
pub struct CredentialStore {
    path: Option<PathBuf>,
    records: RwLock<Records>,
}

impl CredentialStore {
    /// 打开并加载凭据文件（每个进程只应调用一次）
    ///
    /// 文件不存在视为空；文件损坏时记录警告并视为空，下一次写入会覆盖它。
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Records>(&content) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "credential file unreadable, starting empty: {e}");
                    Records::new()
                }
            }
        } else {
            Records::new()
        };

        tracing::debug!(path = %path.display(), providers = records.len(), "credential store hydrated");
        Ok(Self {
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    /// 不落盘的内存存储
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(Records::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, provider: ProviderKind) -> Option<CredentialRecord> {
        self.read().get(&provider).cloned()
    }

    pub fn set(&self, provider: ProviderKind, record: CredentialRecord) -> Result<()> {
        self.update(|records| {
            if record.is_empty() {
                records.remove(&provider);
            } else {
                records.insert(provider, record);
            }
        })
    }

    /// 删除该 Provider 的全部凭据
    pub fn clear(&self, provider: ProviderKind) -> Result<()> {
        self.update(|records| {
            records.remove(&provider);
        })
    }

    /// 是否已认证：非空 API Key，或带非空 access token 的 bundle（不检查过期）
    pub fn is_authenticated(&self, provider: ProviderKind) -> bool {
        self.read()
            .get(&provider)
            .is_some_and(|r| r.has_api_key() || r.has_token())
    }

    pub fn set_api_key(&self, provider: ProviderKind, key: impl Into<String>) -> Result<()> {
        let key = key.into();
        self.update(|records| {
            records.entry(provider).or_default().api_key = Some(key);
        })
    }

    pub fn clear_api_key(&self, provider: ProviderKind) -> Result<()> {
        self.modify(provider, |record| record.api_key = None)
    }

    pub fn token(&self, provider: ProviderKind) -> Option<TokenBundle> {
        self.read().get(&provider).and_then(|r| r.token.clone())
    }

    pub fn set_token(&self, provider: ProviderKind, token: TokenBundle) -> Result<()> {
        self.update(|records| {
            records.entry(provider).or_default().token = Some(token);
        })
    }

    /// 登出：只删除 token，保留已配置的 API Key
    pub fn clear_token(&self, provider: ProviderKind) -> Result<()> {
        self.modify(provider, |record| record.token = None)
    }

    /// 有记录的 Provider 列表
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.read().keys().copied().collect()
    }

    fn modify(&self, provider: ProviderKind, f: impl FnOnce(&mut CredentialRecord)) -> Result<()> {
        self.update(|records| {
            if let Some(record) = records.get_mut(&provider) {
                f(record);
                if record.is_empty() {
                    records.remove(&provider);
                }
            }
        })
    }

    /// 写盘成功后才替换内存中的记录
    fn update(&self, f: impl FnOnce(&mut Records)) -> Result<()> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = records.clone();
        f(&mut next);
        self.persist(&next)?;
        *records = next;
        Ok(())
    }

    fn persist(&self, records: &Records) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(records)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Records> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
