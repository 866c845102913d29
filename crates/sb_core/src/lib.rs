//! # sb_core - Switchboard Core Primitives
//!
//! 核心原语层，定义错误分类、Provider 标识与统一生成结果。
//! 此 crate 是整个项目的基础依赖，不依赖其他业务 crate。

pub mod error;
pub mod provider;
pub mod result;

pub use error::{Result, SwitchboardError};
pub use provider::ProviderKind;
pub use result::{GenerationResult, StreamResult};
