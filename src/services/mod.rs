pub mod auth;
pub mod balance;
pub mod billing;
pub mod quota;

pub use auth::{AuthService, Identity};
pub use balance::BalanceService;
pub use billing::{BillingWorker, BillingWorkerHandle, LedgerQueue, SqliteLedgerQueue, WorkerStats};
pub use quota::QuotaEngine;
