//! 账本数据访问层

use crate::database::{decimal_column, lock_conn, Database};
use crate::error::AppError;
use crate::ledger::LedgerEntry;
use rust_decimal::Decimal;
use rusqlite::{params, Row};

fn ledger_entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let metadata: String = row.get(8)?;
    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        api_key_id: row.get(2)?,
        model_id: row.get(3)?,
        input_tokens: row.get::<_, i64>(4)?.max(0) as u64,
        output_tokens: row.get::<_, i64>(5)?.max(0) as u64,
        total_tokens: row.get::<_, i64>(6)?.max(0) as u64,
        cost: decimal_column(row, 7)?,
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        created_at: row.get(9)?,
    })
}

impl Database {
    /// 写入账本条目
    ///
    /// 同一 id 重复写入时忽略，返回是否实际插入。
    pub fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<bool, AppError> {
        let metadata = serde_json::to_string(&entry.metadata)
            .map_err(|e| AppError::Database(format!("Failed to serialize metadata: {e}")))?;
        let conn = lock_conn!(self.conn);
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO ledger_entries
                    (id, user_id, api_key_id, model_id, input_tokens, output_tokens,
                     total_tokens, cost, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.id,
                    entry.user_id,
                    entry.api_key_id,
                    entry.model_id,
                    entry.input_tokens as i64,
                    entry.output_tokens as i64,
                    entry.total_tokens as i64,
                    entry.cost.to_string(),
                    metadata,
                    entry.created_at,
                ],
            )
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(inserted > 0)
    }

    /// 用户账本总成本
    pub fn get_total_ledger_cost(&self, user_id: &str) -> Result<Decimal, AppError> {
        let conn = lock_conn!(self.conn);
        let mut stmt = conn
            .prepare("SELECT cost FROM ledger_entries WHERE user_id = ?1")
            .map_err(|e| AppError::Database(e.to_string()))?;
        let costs = stmt
            .query_map(params![user_id], |row| decimal_column(row, 0))
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut total = Decimal::ZERO;
        for cost in costs {
            total += cost.map_err(|e| AppError::Database(e.to_string()))?;
        }
        Ok(total)
    }

    /// 最近的账本条目（按创建时间倒序）
    pub fn list_ledger_entries(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<LedgerEntry>, AppError> {
        let conn = lock_conn!(self.conn);
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, api_key_id, model_id, input_tokens, output_tokens,
                        total_tokens, cost, metadata, created_at
                 FROM ledger_entries WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            )
            .map_err(|e| AppError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], ledger_entry_from_row)
            .map_err(|e| AppError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent_by_id() -> Result<(), AppError> {
        let db = Database::memory()?;
        let entry = LedgerEntry::new("u1", Some("k1"), "m1", 50, 120, Decimal::new(2, 2))
            .with_metadata("provider", "openai");

        assert!(db.insert_ledger_entry(&entry)?);
        assert!(!db.insert_ledger_entry(&entry)?);

        let entries = db.list_ledger_entries("u1", 10)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], entry);
        assert_eq!(entries[0].total_tokens, 170);
        Ok(())
    }

    #[test]
    fn test_total_cost_and_listing_order() -> Result<(), AppError> {
        let db = Database::memory()?;
        for (i, cents) in [10, 25, 5].into_iter().enumerate() {
            let mut entry = LedgerEntry::new("u1", None, "m1", 1, 1, Decimal::new(cents, 2));
            entry.created_at = 1_000 + i as i64;
            db.insert_ledger_entry(&entry)?;
        }
        db.insert_ledger_entry(&LedgerEntry::new("u2", None, "m1", 1, 1, Decimal::ONE))?;

        assert_eq!(db.get_total_ledger_cost("u1")?, Decimal::new(40, 2));
        assert_eq!(db.get_total_ledger_cost("nobody")?, Decimal::ZERO);

        let recent = db.list_ledger_entries("u1", 2)?;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].cost, Decimal::new(5, 2));
        assert_eq!(recent[1].cost, Decimal::new(25, 2));
        Ok(())
    }
}
