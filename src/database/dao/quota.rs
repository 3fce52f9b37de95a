//! 配额数据访问层
//!
//! 配额配置与日/月用量窗口的读写。用量增量在单个事务中完成
//! “插入占位行 → 读取 → 合并 → 写回”，同一用户同一窗口的并发增量不会丢失。

use crate::database::{decimal_column, lock_conn, Database};
use crate::error::AppError;
use crate::quota::{ModelLimit, ModelUsage, QuotaConfig, UsageWindow, WindowClass};
use indexmap::IndexMap;
use rusqlite::{params, Connection, OptionalExtension, Row};

const QUOTA_COLUMNS: &str = "user_id, daily_request_limit, daily_token_limit, daily_cost_limit,
    monthly_request_limit, monthly_token_limit, monthly_cost_limit, model_limits,
    rate_limit_per_minute, rate_limit_per_hour, reset_day, timezone, active,
    created_at, updated_at";

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn quota_config_from_row(row: &Row<'_>) -> rusqlite::Result<QuotaConfig> {
    let model_limits: IndexMap<String, ModelLimit> = json_column(row, 7)?;
    Ok(QuotaConfig {
        user_id: row.get(0)?,
        daily_request_limit: to_u64(row.get(1)?),
        daily_token_limit: to_u64(row.get(2)?),
        daily_cost_limit: decimal_column(row, 3)?,
        monthly_request_limit: to_u64(row.get(4)?),
        monthly_token_limit: to_u64(row.get(5)?),
        monthly_cost_limit: decimal_column(row, 6)?,
        model_limits,
        rate_limit_per_minute: row.get::<_, i64>(8)?.clamp(0, u32::MAX as i64) as u32,
        rate_limit_per_hour: row.get::<_, i64>(9)?.clamp(0, u32::MAX as i64) as u32,
        reset_day: row.get::<_, i64>(10)?.clamp(1, 31) as u8,
        timezone: row.get(11)?,
        active: row.get::<_, i64>(12)? != 0,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn usage_window_from_row(row: &Row<'_>) -> rusqlite::Result<UsageWindow> {
    Ok(UsageWindow {
        user_id: row.get(0)?,
        period: row.get(1)?,
        requests: to_u64(row.get(2)?),
        tokens: to_u64(row.get(3)?),
        cost: decimal_column(row, 4)?,
        model_usage: json_column(row, 5)?,
        exceeded: row.get::<_, i64>(6)? != 0,
        updated_at: row.get(7)?,
    })
}

fn select_window(
    conn: &Connection,
    class: WindowClass,
    user_id: &str,
    period: &str,
) -> Result<Option<UsageWindow>, AppError> {
    conn.query_row(
        &format!(
            "SELECT user_id, period, requests, tokens, cost, model_usage, exceeded, updated_at
             FROM {} WHERE user_id = ?1 AND period = ?2",
            class.table()
        ),
        params![user_id, period],
        usage_window_from_row,
    )
    .optional()
    .map_err(|e| AppError::Database(e.to_string()))
}

impl Database {
    pub fn get_quota_config(&self, user_id: &str) -> Result<Option<QuotaConfig>, AppError> {
        let conn = lock_conn!(self.conn);
        conn.query_row(
            &format!("SELECT {QUOTA_COLUMNS} FROM quota_configs WHERE user_id = ?1"),
            params![user_id],
            quota_config_from_row,
        )
        .optional()
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// 若不存在则插入，返回库中最终的配置
    ///
    /// 并发懒创建时以先写入者为准。
    pub fn get_or_insert_quota_config(&self, config: &QuotaConfig) -> Result<QuotaConfig, AppError> {
        {
            let conn = lock_conn!(self.conn);
            Self::write_quota_config(&conn, config, "INSERT OR IGNORE")?;
        }
        self.get_quota_config(&config.user_id)?
            .ok_or_else(|| AppError::NotFound(format!("quota config {}", config.user_id)))
    }

    /// 覆盖写入（管理端调整配额）
    pub fn save_quota_config(&self, config: &QuotaConfig) -> Result<(), AppError> {
        let conn = lock_conn!(self.conn);
        Self::write_quota_config(&conn, config, "INSERT OR REPLACE")
    }

    fn write_quota_config(
        conn: &Connection,
        config: &QuotaConfig,
        verb: &str,
    ) -> Result<(), AppError> {
        let model_limits = serde_json::to_string(&config.model_limits)
            .map_err(|e| AppError::Database(format!("Failed to serialize model_limits: {e}")))?;
        conn.execute(
            &format!(
                "{verb} INTO quota_configs ({QUOTA_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
            ),
            params![
                config.user_id,
                to_i64(config.daily_request_limit),
                to_i64(config.daily_token_limit),
                config.daily_cost_limit.to_string(),
                to_i64(config.monthly_request_limit),
                to_i64(config.monthly_token_limit),
                config.monthly_cost_limit.to_string(),
                model_limits,
                config.rate_limit_per_minute as i64,
                config.rate_limit_per_hour as i64,
                config.reset_day as i64,
                config.timezone,
                config.active as i64,
                config.created_at,
                config.updated_at,
            ],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn get_usage_window(
        &self,
        class: WindowClass,
        user_id: &str,
        period: &str,
    ) -> Result<Option<UsageWindow>, AppError> {
        let conn = lock_conn!(self.conn);
        select_window(&conn, class, user_id, period)
    }

    /// 原子地累加一次用量，返回累加后的窗口
    pub fn increment_usage(
        &self,
        class: WindowClass,
        user_id: &str,
        period: &str,
        model_id: &str,
        delta: &ModelUsage,
    ) -> Result<UsageWindow, AppError> {
        let mut conn = lock_conn!(self.conn);
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Database(e.to_string()))?;

        tx.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (user_id, period) VALUES (?1, ?2)",
                class.table()
            ),
            params![user_id, period],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        let mut window = select_window(&tx, class, user_id, period)?
            .unwrap_or_else(|| UsageWindow::empty(user_id, period));
        window.apply(model_id, delta);
        window.updated_at = chrono::Utc::now().timestamp();

        let model_usage = serde_json::to_string(&window.model_usage)
            .map_err(|e| AppError::Database(format!("Failed to serialize model_usage: {e}")))?;
        tx.execute(
            &format!(
                "UPDATE {} SET requests = ?3, tokens = ?4, cost = ?5, model_usage = ?6, updated_at = ?7
                 WHERE user_id = ?1 AND period = ?2",
                class.table()
            ),
            params![
                user_id,
                period,
                to_i64(window.requests),
                to_i64(window.tokens),
                window.cost.to_string(),
                model_usage,
                window.updated_at,
            ],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;

        tx.commit().map_err(|e| AppError::Database(e.to_string()))?;
        Ok(window)
    }

    /// 置位超限标记（只置位，不清除）
    pub fn mark_usage_exceeded(
        &self,
        class: WindowClass,
        user_id: &str,
        period: &str,
    ) -> Result<(), AppError> {
        let conn = lock_conn!(self.conn);
        conn.execute(
            &format!(
                "UPDATE {} SET exceeded = 1 WHERE user_id = ?1 AND period = ?2",
                class.table()
            ),
            params![user_id, period],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// 清零计数、模型明细和超限标记
    pub fn reset_usage_window(
        &self,
        class: WindowClass,
        user_id: &str,
        period: &str,
    ) -> Result<(), AppError> {
        let conn = lock_conn!(self.conn);
        conn.execute(
            &format!(
                "UPDATE {} SET requests = 0, tokens = 0, cost = '0', model_usage = '{{}}',
                    exceeded = 0, updated_at = ?3
                 WHERE user_id = ?1 AND period = ?2",
                class.table()
            ),
            params![user_id, period, chrono::Utc::now().timestamp()],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
