//! 生成请求
//!
//! 调用方构建与 Provider 无关的消息列表，各 Provider 再编译为自己的请求体。
//! 所有支持的 Provider 都接受 `{model, messages[], stream}` 形式。

use serde::{Deserialize, Serialize};

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 单条对话消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 一次生成请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    messages: Vec<ChatMessage>,
    /// 指定模型；为空时使用 Provider 配置的默认模型
    model: Option<String>,
}

impl GenerationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// 单轮 user 提问的快捷构造
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new().push(ChatMessage::user(text))
    }

    pub fn push(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// 解析最终使用的模型
    pub fn model_or<'a>(&'a self, default_model: &'a str) -> &'a str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(default_model)
    }

    /// 编译为 `{model, messages, stream}` 请求体
    pub fn to_chat_body(&self, default_model: &str, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.model_or(default_model),
            "messages": self.messages,
            "stream": stream
        })
    }
}
