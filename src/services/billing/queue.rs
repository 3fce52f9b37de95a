//! 账本写入队列
//!
//! 请求路径只负责入队，账本写入由后台 worker 消费完成。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::database::Database;
use crate::error::AppError;
use crate::ledger::LedgerEntry;

/// 持久化的待写账本队列
#[async_trait]
pub trait LedgerQueue: Send + Sync {
    async fn push(&self, entry: &LedgerEntry) -> Result<(), AppError>;

    /// 阻塞取出一项，最长等待 `wait`；超时返回 `Ok(None)`
    ///
    /// 取出即从队列删除。payload 无法解析时返回 `AppError::Json`，该项已被丢弃。
    async fn pop(&self, wait: Duration) -> Result<Option<LedgerEntry>, AppError>;

    async fn len(&self) -> Result<u64, AppError>;
}

/// 基于 SQLite `billing_queue` 表的队列，进程重启后未消费的项仍在
pub struct SqliteLedgerQueue {
    db: Arc<Database>,
    notify: Notify,
}

impl SqliteLedgerQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            notify: Notify::new(),
        }
    }
}

#[async_trait]
impl LedgerQueue for SqliteLedgerQueue {
    async fn push(&self, entry: &LedgerEntry) -> Result<(), AppError> {
        let payload = serde_json::to_string(entry)?;
        let seq = self.db.push_billing_item(&payload)?;
        log::debug!("账本条目 {} 已入队 (seq={seq})", entry.id);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, wait: Duration) -> Result<Option<LedgerEntry>, AppError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            if let Some((seq, payload)) = self.db.pop_billing_item()? {
                log::debug!("取出计费队列项 seq={seq}");
                return Ok(Some(serde_json::from_str(&payload)?));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> Result<u64, AppError> {
        self.db.count_billing_items()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_pop_times_out_on_empty_queue() {
        let queue = SqliteLedgerQueue::new(Arc::new(Database::memory().unwrap()));
        let popped = queue.pop(Duration::from_millis(20)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(SqliteLedgerQueue::new(Arc::new(Database::memory().unwrap())));
        let entry = LedgerEntry::new("u1", None, "m1", 5, 7, Decimal::new(1, 2));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(&entry).await.unwrap();

        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(popped, Some(entry));
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dropped() {
        let db = Arc::new(Database::memory().unwrap());
        db.push_billing_item("not json").unwrap();
        let queue = SqliteLedgerQueue::new(db);

        assert!(matches!(
            queue.pop(Duration::from_millis(20)).await,
            Err(AppError::Json(_))
        ));
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
