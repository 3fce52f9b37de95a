//! Provider Adapters Module
//!
//! 供应商适配器模块：把统一的 chat-completion 请求映射为各上游供应商的出站请求。
//!
//! ## 模块结构
//! - `adapter`: 供应商类型与适配规则表
//! - `auth`: 认证信息和认证位置
//! - `transform`: 请求体格式转换

mod adapter;
mod auth;
pub mod transform;

pub use adapter::{
    ModelEncoding, OutboundRequest, ProviderAdapter, ProviderKind, WireFormat, ADAPTER_TABLE,
};
pub use auth::{AuthInfo, AuthStrategy};
