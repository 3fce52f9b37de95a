//! 网关配置
//!
//! 从 TOML 文件加载，缺省时使用默认值；部分字段可由环境变量覆盖。

use crate::error::AppError;
use crate::provider::{Model, Provider};
use crate::quota::QuotaDefaults;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "AI_GATEWAY_CONFIG";
pub const LISTEN_ENV: &str = "AI_GATEWAY_LISTEN";
pub const DB_PATH_ENV: &str = "AI_GATEWAY_DB_PATH";
pub const PRODUCTION_ENV: &str = "AI_GATEWAY_PRODUCTION";

/// 网关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// 监听地址
    pub listen_address: String,
    /// 监听端口
    pub listen_port: u16,
    /// SQLite 数据库路径，缺省为 `~/.ai-gateway/gateway.db`
    pub database_path: Option<PathBuf>,
    /// 生产模式；非生产模式下未配置 Key 的供应商返回模拟响应
    pub production: bool,
    /// 上游请求超时（秒）
    pub request_timeout_secs: u64,
    /// 计费队列轮询等待时间（秒）
    pub queue_poll_interval_secs: u64,
    /// 请求未声明 max_tokens 时的输出 token 估算值
    pub default_max_tokens: u32,
    pub log_level: String,
    pub quota_defaults: QuotaDefaults,
    /// 启动时写入目录的供应商
    pub providers: Vec<Provider>,
    /// 启动时写入目录的模型
    pub models: Vec<Model>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            listen_port: 15800,
            database_path: None,
            production: false,
            request_timeout_secs: 30,
            queue_poll_interval_secs: 5,
            default_max_tokens: 1024,
            log_level: "info".to_string(),
            quota_defaults: QuotaDefaults::default(),
            providers: Vec::new(),
            models: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// 默认配置目录 `~/.ai-gateway`
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ai-gateway"))
    }

    /// 按环境变量或默认路径加载配置
    pub fn load() -> Result<Self, AppError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| Self::config_dir().map(|dir| dir.join("config.toml")));

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            Some(path) => {
                log::info!("配置文件不存在，使用默认配置: {}", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
        Self::from_toml_str(&content)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        toml::from_str(content).map_err(|e| AppError::Config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) -> Result<(), AppError> {
        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            let (address, port) = listen
                .rsplit_once(':')
                .ok_or_else(|| AppError::Config(format!("{LISTEN_ENV} 格式应为 host:port")))?;
            self.listen_address = address.to_string();
            self.listen_port = port
                .parse()
                .map_err(|e| AppError::Config(format!("{LISTEN_ENV} 端口无效: {e}")))?;
        }
        if let Some(path) = std::env::var_os(DB_PATH_ENV) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Ok(value) = std::env::var(PRODUCTION_ENV) {
            let normalized = value.trim().to_lowercase();
            self.production = normalized == "true" || normalized == "1";
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.listen_port == 0 {
            return Err(AppError::Config("listen_port 不能为 0".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::Config("request_timeout_secs 必须大于 0".to_string()));
        }
        if self.queue_poll_interval_secs == 0 {
            return Err(AppError::Config(
                "queue_poll_interval_secs 必须大于 0".to_string(),
            ));
        }
        if !(1..=31).contains(&self.quota_defaults.reset_day) {
            return Err(AppError::Config(format!(
                "quota_defaults.reset_day 超出范围: {}",
                self.quota_defaults.reset_day
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(|| Self::config_dir().map(|dir| dir.join("gateway.db")))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_secs(self.queue_poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serial_test::serial;

    #[test]
    fn test_parse_full_config() {
        let config = GatewayConfig::from_toml_str(
            r#"
            listen_port = 9000
            production = true
            default_max_tokens = 512

            [quota_defaults]
            daily_request_limit = 10
            daily_cost_limit = "2.5"
            timezone = "Asia/Shanghai"
            reset_day = 15

            [[providers]]
            id = "p-openai"
            name = "openai"
            baseUrl = "https://api.openai.com/v1"
            apiKey = "sk-test"

            [[models]]
            id = "m-gpt4o"
            name = "gpt-4o"
            providerId = "p-openai"
            inputPricePer1k = "0.005"
            outputPricePer1k = "0.015"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_port, 9000);
        assert!(config.production);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.quota_defaults.daily_request_limit, 10);
        assert_eq!(config.quota_defaults.daily_cost_limit, Decimal::new(25, 1));
        assert_eq!(config.quota_defaults.monthly_request_limit, 30_000);
        assert_eq!(config.providers[0].api_key, "sk-test");
        assert_eq!(config.models[0].input_price_per_1k, Decimal::new(5, 3));
        assert!(config.models[0].active);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = GatewayConfig {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_load_applies_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "listen_port = 9100\n").unwrap();

        std::env::set_var(CONFIG_PATH_ENV, &path);
        std::env::set_var(LISTEN_ENV, "0.0.0.0:9200");
        std::env::set_var(PRODUCTION_ENV, "1");
        let loaded = GatewayConfig::load();
        std::env::remove_var(CONFIG_PATH_ENV);
        std::env::remove_var(LISTEN_ENV);
        std::env::remove_var(PRODUCTION_ENV);

        let config = loaded.unwrap();
        assert_eq!(config.listen_address, "0.0.0.0");
        assert_eq!(config.listen_port, 9200);
        assert!(config.production);
    }
}
