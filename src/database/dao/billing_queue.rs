//! 计费队列数据访问层
//!
//! 先进先出：`seq` 自增，取出即删除。

use crate::database::{lock_conn, Database};
use crate::error::AppError;
use rusqlite::{params, OptionalExtension};

impl Database {
    /// 入队，返回序号
    pub fn push_billing_item(&self, payload: &str) -> Result<i64, AppError> {
        let conn = lock_conn!(self.conn);
        conn.execute(
            "INSERT INTO billing_queue (payload, enqueued_at) VALUES (?1, ?2)",
            params![payload, chrono::Utc::now().timestamp()],
        )
        .map_err(|e| AppError::Queue(e.to_string()))?;
        Ok(conn.last_insert_rowid())
    }

    /// 取出最早的一项（同一事务内读取并删除）
    pub fn pop_billing_item(&self) -> Result<Option<(i64, String)>, AppError> {
        let mut conn = lock_conn!(self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Queue(e.to_string()))?;

        let item: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, payload FROM billing_queue ORDER BY seq ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| AppError::Queue(e.to_string()))?;

        if let Some((seq, _)) = &item {
            tx.execute("DELETE FROM billing_queue WHERE seq = ?1", params![seq])
                .map_err(|e| AppError::Queue(e.to_string()))?;
        }
        tx.commit().map_err(|e| AppError::Queue(e.to_string()))?;
        Ok(item)
    }

    pub fn count_billing_items(&self) -> Result<u64, AppError> {
        let conn = lock_conn!(self.conn);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM billing_queue", [], |row| row.get(0))
            .map_err(|e| AppError::Queue(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}
