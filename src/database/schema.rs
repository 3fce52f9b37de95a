//! Schema 定义
//!
//! 负责数据库表结构的创建，所有语句均可重复执行。

use super::{lock_conn, Database, SCHEMA_VERSION};
use crate::error::AppError;
use rusqlite::Connection;

impl Database {
    /// 创建所有数据库表
    pub(crate) fn create_tables(&self) -> Result<(), AppError> {
        let conn = lock_conn!(self.conn);
        Self::create_tables_on_conn(&conn)
    }

    /// 在指定连接上创建表（供测试使用）
    pub(crate) fn create_tables_on_conn(conn: &Connection) -> Result<(), AppError> {
        // 1. Providers 表（模型目录：上游供应商）
        conn.execute(
            "CREATE TABLE IF NOT EXISTS providers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                base_url TEXT NOT NULL,
                api_key TEXT NOT NULL DEFAULT '',
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            )",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        // 2. Models 表（价格为 USD / 1K tokens，TEXT 存储 Decimal）
        conn.execute(
            "CREATE TABLE IF NOT EXISTS models (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                input_price_per_1k TEXT NOT NULL DEFAULT '0',
                output_price_per_1k TEXT NOT NULL DEFAULT '0',
                max_tokens INTEGER,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
                FOREIGN KEY (provider_id) REFERENCES providers(id) ON DELETE CASCADE
            )",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_models_name ON models(name)",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        // 3. API Keys 表（仅保存 SHA-256 摘要）
        conn.execute(
            "CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                key_hash TEXT NOT NULL UNIQUE,
                name TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        // 4. Payments 表（余额 = 已支付总额 - 账本总成本）
        conn.execute(
            "CREATE TABLE IF NOT EXISTS payments (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'paid',
                created_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payments_user ON payments(user_id, status)",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        // 5. Quota Configs 表（每用户一行，首次访问时懒创建）
        conn.execute(
            "CREATE TABLE IF NOT EXISTS quota_configs (
                user_id TEXT PRIMARY KEY,
                daily_request_limit INTEGER NOT NULL,
                daily_token_limit INTEGER NOT NULL,
                daily_cost_limit TEXT NOT NULL,
                monthly_request_limit INTEGER NOT NULL,
                monthly_token_limit INTEGER NOT NULL,
                monthly_cost_limit TEXT NOT NULL,
                model_limits TEXT NOT NULL DEFAULT '{}',
                rate_limit_per_minute INTEGER NOT NULL DEFAULT 0,
                rate_limit_per_hour INTEGER NOT NULL DEFAULT 0,
                reset_day INTEGER NOT NULL DEFAULT 1,
                timezone TEXT NOT NULL DEFAULT 'UTC',
                active INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        // 6/7. Daily / Monthly Usage 表（结构相同，period 分别为日期和年月）
        for table in ["daily_usage", "monthly_usage"] {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        user_id TEXT NOT NULL,
                        period TEXT NOT NULL,
                        requests INTEGER NOT NULL DEFAULT 0,
                        tokens INTEGER NOT NULL DEFAULT 0,
                        cost TEXT NOT NULL DEFAULT '0',
                        model_usage TEXT NOT NULL DEFAULT '{{}}',
                        exceeded INTEGER NOT NULL DEFAULT 0,
                        updated_at INTEGER NOT NULL DEFAULT 0,
                        PRIMARY KEY (user_id, period)
                    )"
                ),
                [],
            )
            .map_err(|e| AppError::Database(e.to_string()))?;
        }

        // 8. Ledger Entries 表（只追加，不更新）
        conn.execute(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                api_key_id TEXT,
                model_id TEXT NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                cost TEXT NOT NULL DEFAULT '0',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_user_created
             ON ledger_entries(user_id, created_at)",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        // 9. Billing Queue 表（待写入账本的持久化队列）
        conn.execute(
            "CREATE TABLE IF NOT EXISTS billing_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
