use std::path::Path;

use thiserror::Error;

/// 全局错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("配置错误: {0}")]
    Config(String),
    #[error("无效的输入: {0}")]
    InvalidInput(String),
    #[error("IO 错误: {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),
    #[error("数据库错误: {0}")]
    Database(String),
    #[error("未找到: {0}")]
    NotFound(String),
    #[error("队列错误: {0}")]
    Queue(String),
    #[error("锁获取失败: {0}")]
    Lock(String),
}

impl AppError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(err: rust_decimal::Error) -> Self {
        Self::Database(format!("金额解析失败: {err}"))
    }
}
