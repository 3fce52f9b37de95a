//! 计费：账本写入队列与后台消费者

pub mod queue;
pub mod worker;

pub use queue::{LedgerQueue, SqliteLedgerQueue};
pub use worker::{BillingWorker, BillingWorkerHandle, WorkerStats};

use crate::database::Database;
use crate::ledger::LedgerEntry;
use crate::proxy::log_codes::bil as log_bil;

/// 入队一条账本写入；入队失败时同步写入账本
///
/// 不向调用方返回错误：此时上游已经响应，失败只记录日志。
pub async fn enqueue_ledger_write(queue: &dyn LedgerQueue, db: &Database, entry: LedgerEntry) {
    let err = match queue.push(&entry).await {
        Ok(()) => return,
        Err(e) => e,
    };
    log::warn!(
        "[{}] 账本条目 {} 入队失败，改为同步写入: {err}",
        log_bil::ENQUEUE_FAILED,
        entry.id
    );
    if let Err(e) = db.insert_ledger_entry(&entry) {
        log::error!(
            "[{}] 账本条目 {} 同步写入失败 (user={}, cost={}): {e}",
            log_bil::FALLBACK_INSERT_FAILED,
            entry.id,
            entry.user_id,
            entry.cost
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::time::Duration;

    struct BrokenQueue;

    #[async_trait]
    impl LedgerQueue for BrokenQueue {
        async fn push(&self, _entry: &LedgerEntry) -> Result<(), AppError> {
            Err(AppError::Queue("unavailable".to_string()))
        }

        async fn pop(&self, _wait: Duration) -> Result<Option<LedgerEntry>, AppError> {
            Ok(None)
        }

        async fn len(&self) -> Result<u64, AppError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_enqueue_falls_back_to_direct_insert() {
        let db = Database::memory().unwrap();
        let entry = LedgerEntry::new("u1", Some("k1"), "m1", 50, 120, Decimal::new(3, 2));

        enqueue_ledger_write(&BrokenQueue, &db, entry.clone()).await;

        let entries = db.list_ledger_entries("u1", 10).unwrap();
        assert_eq!(entries, vec![entry]);
    }
}
