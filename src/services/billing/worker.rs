//! 计费队列消费者
//!
//! 单个后台任务：从队列阻塞取出账本条目并写入账本。写入失败只记录日志并丢弃。
//! 运行状态由 `BillingWorkerHandle` 持有，停止时返回最终统计。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::queue::LedgerQueue;
use crate::database::Database;
use crate::error::AppError;
use crate::proxy::log_codes::bil as log_bil;

/// Worker 运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
}

pub struct BillingWorker;

impl BillingWorker {
    /// 启动消费任务
    ///
    /// 停止信号在等待队列期间立即生效，最迟在一个轮询周期内退出。
    pub fn start(
        queue: Arc<dyn LedgerQueue>,
        db: Arc<Database>,
        poll_interval: Duration,
    ) -> BillingWorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let (stats_tx, stats_rx) = watch::channel(WorkerStats::default());

        let task = tokio::spawn(async move {
            let mut stats = WorkerStats::default();
            log::info!("[{}] 计费 worker 已启动", log_bil::WORKER_STARTED);

            loop {
                let popped = tokio::select! {
                    _ = &mut shutdown_rx => break,
                    popped = queue.pop(poll_interval) => popped,
                };

                match popped {
                    Ok(Some(entry)) => match db.insert_ledger_entry(&entry) {
                        Ok(inserted) => {
                            if !inserted {
                                log::debug!("账本条目 {} 已存在，忽略重复投递", entry.id);
                            }
                            stats.processed += 1;
                            stats.last_processed_at = Some(Utc::now());
                        }
                        Err(e) => {
                            stats.failed += 1;
                            log::error!(
                                "[{}] 账本写入失败，丢弃条目 {} (user={}, cost={}): {e}",
                                log_bil::INSERT_FAILED,
                                entry.id,
                                entry.user_id,
                                entry.cost
                            );
                        }
                    },
                    Ok(None) => continue,
                    Err(AppError::Json(e)) => {
                        stats.failed += 1;
                        log::error!("[{}] 队列项无法解析，已丢弃: {e}", log_bil::DECODE_FAILED);
                    }
                    Err(e) => {
                        log::warn!("[{}] 计费队列不可用: {e}", log_bil::QUEUE_UNAVAILABLE);
                        tokio::select! {
                            _ = &mut shutdown_rx => break,
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                    }
                }
                stats_tx.send_replace(stats.clone());
            }

            stats_tx.send_replace(stats.clone());
            log::info!(
                "[{}] 计费 worker 已停止 (processed={}, failed={})",
                log_bil::WORKER_STOPPED,
                stats.processed,
                stats.failed
            );
            stats
        });

        BillingWorkerHandle {
            shutdown_tx: Some(shutdown_tx),
            stats_rx,
            task,
        }
    }
}

/// 运行中的 worker
pub struct BillingWorkerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    stats_rx: watch::Receiver<WorkerStats>,
    task: JoinHandle<WorkerStats>,
}

impl BillingWorkerHandle {
    /// 当前统计快照
    pub fn stats(&self) -> WorkerStats {
        self.stats_rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// 发送停止信号并等待任务退出
    pub async fn stop(mut self) -> WorkerStats {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match (&mut self.task).await {
            Ok(stats) => stats,
            Err(e) => {
                log::error!("[{}] 计费 worker 异常退出: {e}", log_bil::WORKER_STOPPED);
                self.stats_rx.borrow().clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerEntry;
    use crate::services::billing::queue::SqliteLedgerQueue;
    use rust_decimal::Decimal;

    async fn wait_for_processed(handle: &BillingWorkerHandle, n: u64) {
        for _ in 0..200 {
            if handle.stats().processed + handle.stats().failed >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_worker_drains_queue_into_ledger() {
        let db = Arc::new(Database::memory().unwrap());
        let queue = Arc::new(SqliteLedgerQueue::new(db.clone()));
        let handle = BillingWorker::start(queue.clone(), db.clone(), Duration::from_millis(50));

        for cents in [10, 20] {
            let entry = LedgerEntry::new("u1", None, "m1", 1, 1, Decimal::new(cents, 2));
            queue.push(&entry).await.unwrap();
        }
        wait_for_processed(&handle, 2).await;
        assert!(handle.is_running());

        let stats = handle.stop().await;
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 0);
        assert!(stats.last_processed_at.is_some());
        assert_eq!(db.get_total_ledger_cost("u1").unwrap(), Decimal::new(30, 2));
    }

    #[tokio::test]
    async fn test_worker_counts_undecodable_items_as_failed() {
        let db = Arc::new(Database::memory().unwrap());
        db.push_billing_item("{broken").unwrap();
        let queue = Arc::new(SqliteLedgerQueue::new(db.clone()));
        let handle = BillingWorker::start(queue, db, Duration::from_millis(50));

        wait_for_processed(&handle, 1).await;
        let stats = handle.stop().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 0);
    }

    #[tokio::test]
    async fn test_stop_returns_within_poll_interval() {
        let db = Arc::new(Database::memory().unwrap());
        let queue = Arc::new(SqliteLedgerQueue::new(db.clone()));
        let handle = BillingWorker::start(queue, db, Duration::from_secs(5));

        let stats = tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("worker should stop");
        assert_eq!(stats, WorkerStats::default());
    }
}
