//! 网关代理模块
//!
//! 对外提供统一的 chat-completion 接口，按模型路由到上游供应商，
//! 并在转发前后完成配额、限流、余额检查和计费。

pub mod error;
mod forwarder;
pub mod handler_context;
mod handlers;
pub mod log_codes;
pub mod providers;
pub mod rate_limiter;
pub mod server;
pub mod types;
pub mod usage;

pub use error::ProxyError;
pub use forwarder::{RequestForwarder, UpstreamResponse};
pub use rate_limiter::RateLimiter;
pub use server::{router, ProxyServer, ProxyState};
pub use types::{ChatCompletionRequest, ChatMessage, ProxyServerInfo};
