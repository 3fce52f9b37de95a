//! AI 计费网关
//!
//! 在多个模型推理供应商之前提供统一入口：认证调用方、执行配额与限流、
//! 检查余额、转发请求，并把实际用量写入账本。

pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod provider;
pub mod proxy;
pub mod quota;
pub mod services;

pub use config::GatewayConfig;
pub use database::Database;
pub use error::AppError;
pub use ledger::LedgerEntry;
pub use provider::{Model, Provider, ResolvedModel};
pub use proxy::{ProxyError, ProxyServer, ProxyState};
pub use quota::{QuotaConfig, QuotaDecision, QuotaDefaults, QuotaReport};
pub use services::{
    AuthService, BalanceService, BillingWorker, LedgerQueue, QuotaEngine, SqliteLedgerQueue,
};
