//! Data Access Object layer
//!
//! Database access operations for each domain

pub mod accounts;
pub mod billing_queue;
pub mod catalog;
pub mod ledger;
pub mod quota;

// 所有 DAO 方法都通过 Database impl 提供，无需单独导出
