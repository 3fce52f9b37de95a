//! 账户数据访问层
//!
//! API Key 摘要查询与支付记录（余额计算的“已支付”部分）

use crate::database::{decimal_column, lock_conn, Database};
use crate::error::AppError;
use rust_decimal::Decimal;
use rusqlite::{params, OptionalExtension};

/// API Key 记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyRecord {
    pub id: String,
    pub user_id: String,
    pub name: Option<String>,
    pub active: bool,
}

impl Database {
    pub fn insert_api_key(
        &self,
        id: &str,
        user_id: &str,
        key_hash: &str,
        name: Option<&str>,
    ) -> Result<(), AppError> {
        let conn = lock_conn!(self.conn);
        conn.execute(
            "INSERT INTO api_keys (id, user_id, key_hash, name, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![id, user_id, key_hash, name, chrono::Utc::now().timestamp()],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, AppError> {
        let conn = lock_conn!(self.conn);
        conn.query_row(
            "SELECT id, user_id, name, active FROM api_keys WHERE key_hash = ?1",
            params![key_hash],
            |row| {
                Ok(ApiKeyRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    name: row.get(2)?,
                    active: row.get::<_, i64>(3)? != 0,
                })
            },
        )
        .optional()
        .map_err(|e| AppError::Database(e.to_string()))
    }

    pub fn set_api_key_active(&self, id: &str, active: bool) -> Result<bool, AppError> {
        let conn = lock_conn!(self.conn);
        let affected = conn
            .execute(
                "UPDATE api_keys SET active = ?2 WHERE id = ?1",
                params![id, active as i64],
            )
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(affected > 0)
    }

    /// 写入一条支付记录（支付回调校验由外部完成）
    pub fn insert_payment(
        &self,
        user_id: &str,
        amount: Decimal,
        status: &str,
    ) -> Result<String, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let conn = lock_conn!(self.conn);
        conn.execute(
            "INSERT INTO payments (id, user_id, amount, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                user_id,
                amount.to_string(),
                status,
                chrono::Utc::now().timestamp()
            ],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(id)
    }

    /// 已支付总额
    pub fn get_total_paid(&self, user_id: &str) -> Result<Decimal, AppError> {
        let conn = lock_conn!(self.conn);
        let mut stmt = conn
            .prepare("SELECT amount FROM payments WHERE user_id = ?1 AND status = 'paid'")
            .map_err(|e| AppError::Database(e.to_string()))?;
        let amounts = stmt
            .query_map(params![user_id], |row| decimal_column(row, 0))
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut total = Decimal::ZERO;
        for amount in amounts {
            total += amount.map_err(|e| AppError::Database(e.to_string()))?;
        }
        Ok(total)
    }
}
