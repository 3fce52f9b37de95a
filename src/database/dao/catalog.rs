//! 模型目录数据访问层
//!
//! 供应商与模型的查询和写入（管理端 CRUD 不在本服务内，这里只提供启动种子写入）

use crate::database::{decimal_column, lock_conn, Database};
use crate::error::AppError;
use crate::provider::{Model, Provider};
use rusqlite::{params, OptionalExtension, Row};

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<Provider> {
    Ok(Provider {
        id: row.get(0)?,
        name: row.get(1)?,
        base_url: row.get(2)?,
        api_key: row.get(3)?,
        active: row.get::<_, i64>(4)? != 0,
    })
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<Model> {
    Ok(Model {
        id: row.get(0)?,
        name: row.get(1)?,
        provider_id: row.get(2)?,
        input_price_per_1k: decimal_column(row, 3)?,
        output_price_per_1k: decimal_column(row, 4)?,
        max_tokens: row.get::<_, Option<i64>>(5)?.map(|v| v as u32),
        active: row.get::<_, i64>(6)? != 0,
    })
}

const MODEL_COLUMNS: &str =
    "id, name, provider_id, input_price_per_1k, output_price_per_1k, max_tokens, active";

impl Database {
    pub fn upsert_provider(&self, provider: &Provider) -> Result<(), AppError> {
        let conn = lock_conn!(self.conn);
        conn.execute(
            "INSERT INTO providers (id, name, base_url, api_key, active)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                base_url = excluded.base_url,
                api_key = excluded.api_key,
                active = excluded.active",
            params![
                provider.id,
                provider.name,
                provider.base_url,
                provider.api_key,
                provider.active as i64,
            ],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn upsert_model(&self, model: &Model) -> Result<(), AppError> {
        let conn = lock_conn!(self.conn);
        conn.execute(
            "INSERT INTO models (id, name, provider_id, input_price_per_1k, output_price_per_1k, max_tokens, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                provider_id = excluded.provider_id,
                input_price_per_1k = excluded.input_price_per_1k,
                output_price_per_1k = excluded.output_price_per_1k,
                max_tokens = excluded.max_tokens,
                active = excluded.active",
            params![
                model.id,
                model.name,
                model.provider_id,
                model.input_price_per_1k.to_string(),
                model.output_price_per_1k.to_string(),
                model.max_tokens.map(i64::from),
                model.active as i64,
            ],
        )
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn get_provider(&self, id: &str) -> Result<Option<Provider>, AppError> {
        let conn = lock_conn!(self.conn);
        conn.query_row(
            "SELECT id, name, base_url, api_key, active FROM providers WHERE id = ?1",
            params![id],
            provider_from_row,
        )
        .optional()
        .map_err(|e| AppError::Database(e.to_string()))
    }

    pub fn get_model(&self, id: &str) -> Result<Option<Model>, AppError> {
        let conn = lock_conn!(self.conn);
        conn.query_row(
            &format!("SELECT {MODEL_COLUMNS} FROM models WHERE id = ?1"),
            params![id],
            model_from_row,
        )
        .optional()
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// 按公开名称在启用的模型中查找
    ///
    /// 同名多条时取最早创建的一条。
    pub fn find_active_model_by_name(&self, name: &str) -> Result<Option<Model>, AppError> {
        let conn = lock_conn!(self.conn);
        conn.query_row(
            &format!(
                "SELECT {MODEL_COLUMNS} FROM models
                 WHERE name = ?1 AND active = 1
                 ORDER BY created_at ASC, id ASC LIMIT 1"
            ),
            params![name],
            model_from_row,
        )
        .optional()
        .map_err(|e| AppError::Database(e.to_string()))
    }
}
