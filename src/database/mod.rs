//! 数据库模块
//!
//! 基于 SQLite 的持久化层：模型目录、配额配置、日/月用量、账本和计费队列。
//! 所有 DAO 方法都以 `impl Database` 的形式分布在 `dao` 子模块中。

pub mod dao;
mod schema;

use crate::error::AppError;
use rust_decimal::Decimal;
use rusqlite::types::Type;
use rusqlite::Connection;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

/// 当前 Schema 版本，写入 `PRAGMA user_version`
pub const SCHEMA_VERSION: i32 = 1;

/// 获取连接锁，失败时以 `AppError::Lock` 提前返回
macro_rules! lock_conn {
    ($mutex:expr) => {
        $mutex
            .lock()
            .map_err(|e| $crate::error::AppError::Lock(e.to_string()))?
    };
}

pub(crate) use lock_conn;

/// 读取 TEXT 列中的 Decimal 金额
pub(crate) fn decimal_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(text.trim())
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 数据库连接封装
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// 打开（或创建）指定路径的数据库
    pub fn new(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL 在崩溃后保留已提交的队列项
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        log::info!("数据库已打开: {}", path.display());
        Ok(db)
    }

    /// 内存数据库（测试使用）
    pub fn memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }
}
