//! 配额数据模型
//!
//! 用户配额配置、日/月用量窗口以及准入决策的类型定义。
//! 持久化见 `database::dao::quota`，计算逻辑见 `services::quota`。

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// 系统默认配额（首次访问时用于懒创建 QuotaConfig）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaDefaults {
    pub daily_request_limit: u64,
    pub daily_token_limit: u64,
    pub daily_cost_limit: Decimal,
    pub monthly_request_limit: u64,
    pub monthly_token_limit: u64,
    pub monthly_cost_limit: Decimal,
    /// 每分钟请求上限（0 表示不限制）
    pub rate_limit_per_minute: u32,
    /// 每小时请求上限（0 表示不限制）
    pub rate_limit_per_hour: u32,
    pub reset_day: u8,
    pub timezone: String,
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            daily_request_limit: 1_000,
            daily_token_limit: 1_000_000,
            daily_cost_limit: Decimal::from(10),
            monthly_request_limit: 30_000,
            monthly_token_limit: 30_000_000,
            monthly_cost_limit: Decimal::from(300),
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 1_000,
            reset_day: 1,
            timezone: "UTC".to_string(),
        }
    }
}

/// 单模型配额覆盖
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelLimit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_request_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_token_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_cost_limit: Option<Decimal>,
}

/// 用户配额配置
///
/// `daily_* <= monthly_*` 不做校验，管理员可以设置不一致的值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaConfig {
    pub user_id: String,
    pub daily_request_limit: u64,
    pub daily_token_limit: u64,
    pub daily_cost_limit: Decimal,
    pub monthly_request_limit: u64,
    pub monthly_token_limit: u64,
    pub monthly_cost_limit: Decimal,
    #[serde(default)]
    pub model_limits: IndexMap<String, ModelLimit>,
    pub rate_limit_per_minute: u32,
    pub rate_limit_per_hour: u32,
    /// 月度重置日（1-31，超过当月天数时取当月最后一天）
    pub reset_day: u8,
    /// IANA 时区标识，如 `Asia/Shanghai`
    pub timezone: String,
    pub active: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl QuotaConfig {
    pub fn from_defaults(user_id: &str, defaults: &QuotaDefaults) -> Self {
        let now = Utc::now().timestamp();
        Self {
            user_id: user_id.to_string(),
            daily_request_limit: defaults.daily_request_limit,
            daily_token_limit: defaults.daily_token_limit,
            daily_cost_limit: defaults.daily_cost_limit,
            monthly_request_limit: defaults.monthly_request_limit,
            monthly_token_limit: defaults.monthly_token_limit,
            monthly_cost_limit: defaults.monthly_cost_limit,
            model_limits: IndexMap::new(),
            rate_limit_per_minute: defaults.rate_limit_per_minute,
            rate_limit_per_hour: defaults.rate_limit_per_hour,
            reset_day: defaults.reset_day.clamp(1, 31),
            timezone: defaults.timezone.clone(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 单模型用量
///
/// 数值字段在合并时累加；`metadata` 是供应商相关的开放扩展，合并时覆盖。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    #[serde(default)]
    pub requests: u64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub cost: Decimal,
    #[serde(default, flatten)]
    pub metadata: Map<String, Value>,
}

impl ModelUsage {
    /// 单次请求的增量
    pub fn single(tokens: u64, cost: Decimal) -> Self {
        Self {
            requests: 1,
            tokens,
            cost,
            metadata: Map::new(),
        }
    }

    pub fn merge(&mut self, delta: &ModelUsage) {
        self.requests = self.requests.saturating_add(delta.requests);
        self.tokens = self.tokens.saturating_add(delta.tokens);
        self.cost += delta.cost;
        for (key, value) in &delta.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
    }
}

/// 窗口类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowClass {
    Daily,
    Monthly,
}

impl WindowClass {
    pub fn table(&self) -> &'static str {
        match self {
            WindowClass::Daily => "daily_usage",
            WindowClass::Monthly => "monthly_usage",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowClass::Daily => "daily",
            WindowClass::Monthly => "monthly",
        }
    }
}

/// 某个窗口（某日或某月）的用量计数
///
/// 日窗口的 `period` 为 `YYYY-MM-DD`，月窗口为 `YYYY-MM`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageWindow {
    pub user_id: String,
    pub period: String,
    pub requests: u64,
    pub tokens: u64,
    pub cost: Decimal,
    pub model_usage: IndexMap<String, ModelUsage>,
    pub exceeded: bool,
    pub updated_at: i64,
}

impl UsageWindow {
    pub fn empty(user_id: &str, period: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            period: period.to_string(),
            requests: 0,
            tokens: 0,
            cost: Decimal::ZERO,
            model_usage: IndexMap::new(),
            exceeded: false,
            updated_at: 0,
        }
    }

    /// 合并一次增量（计数累加，模型明细按模型合并）
    pub fn apply(&mut self, model_id: &str, delta: &ModelUsage) {
        self.requests = self.requests.saturating_add(delta.requests);
        self.tokens = self.tokens.saturating_add(delta.tokens);
        self.cost += delta.cost;
        self.model_usage
            .entry(model_id.to_string())
            .or_default()
            .merge(delta);
    }
}

pub type DailyUsage = UsageWindow;
pub type MonthlyUsage = UsageWindow;

/// 六个上限，按评估顺序排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    DailyRequests,
    DailyTokens,
    DailyCost,
    MonthlyRequests,
    MonthlyTokens,
    MonthlyCost,
}

impl LimitKind {
    pub const ORDERED: [LimitKind; 6] = [
        LimitKind::DailyRequests,
        LimitKind::DailyTokens,
        LimitKind::DailyCost,
        LimitKind::MonthlyRequests,
        LimitKind::MonthlyTokens,
        LimitKind::MonthlyCost,
    ];

    pub fn window(&self) -> WindowClass {
        match self {
            LimitKind::DailyRequests | LimitKind::DailyTokens | LimitKind::DailyCost => {
                WindowClass::Daily
            }
            _ => WindowClass::Monthly,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            LimitKind::DailyRequests => "daily request limit exceeded",
            LimitKind::DailyTokens => "daily token limit exceeded",
            LimitKind::DailyCost => "daily cost limit exceeded",
            LimitKind::MonthlyRequests => "monthly request limit exceeded",
            LimitKind::MonthlyTokens => "monthly token limit exceeded",
            LimitKind::MonthlyCost => "monthly cost limit exceeded",
        }
    }
}

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    Inactive,
    Limit(LimitKind),
}

impl DenialReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::Inactive => "quota is not active",
            DenialReason::Limit(kind) => kind.message(),
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl Serialize for DenialReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.message())
    }
}

/// 单个上限的当前用量与上限值
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LimitUsage<T> {
    pub used: T,
    pub limit: T,
}

/// 六组用量/上限快照
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub daily_requests: LimitUsage<u64>,
    pub daily_tokens: LimitUsage<u64>,
    pub daily_cost: LimitUsage<Decimal>,
    pub monthly_requests: LimitUsage<u64>,
    pub monthly_tokens: LimitUsage<u64>,
    pub monthly_cost: LimitUsage<Decimal>,
}

impl UsageSnapshot {
    pub fn new(config: &QuotaConfig, daily: &UsageWindow, monthly: &UsageWindow) -> Self {
        Self {
            daily_requests: LimitUsage {
                used: daily.requests,
                limit: config.daily_request_limit,
            },
            daily_tokens: LimitUsage {
                used: daily.tokens,
                limit: config.daily_token_limit,
            },
            daily_cost: LimitUsage {
                used: daily.cost,
                limit: config.daily_cost_limit,
            },
            monthly_requests: LimitUsage {
                used: monthly.requests,
                limit: config.monthly_request_limit,
            },
            monthly_tokens: LimitUsage {
                used: monthly.tokens,
                limit: config.monthly_token_limit,
            },
            monthly_cost: LimitUsage {
                used: monthly.cost,
                limit: config.monthly_cost_limit,
            },
        }
    }

    /// 加上一次请求的增量后，`kind` 是否超出上限
    pub fn exceeds_with(&self, kind: LimitKind, tokens: u64, cost: Decimal) -> bool {
        match kind {
            LimitKind::DailyRequests => {
                self.daily_requests.used.saturating_add(1) > self.daily_requests.limit
            }
            LimitKind::DailyTokens => {
                self.daily_tokens.used.saturating_add(tokens) > self.daily_tokens.limit
            }
            LimitKind::DailyCost => self.daily_cost.used + cost > self.daily_cost.limit,
            LimitKind::MonthlyRequests => {
                self.monthly_requests.used.saturating_add(1) > self.monthly_requests.limit
            }
            LimitKind::MonthlyTokens => {
                self.monthly_tokens.used.saturating_add(tokens) > self.monthly_tokens.limit
            }
            LimitKind::MonthlyCost => self.monthly_cost.used + cost > self.monthly_cost.limit,
        }
    }

    /// 当前计数是否已超出 `kind` 的上限；恰好用满不算
    pub fn crossed(&self, kind: LimitKind) -> bool {
        match kind {
            LimitKind::DailyRequests => self.daily_requests.used > self.daily_requests.limit,
            LimitKind::DailyTokens => self.daily_tokens.used > self.daily_tokens.limit,
            LimitKind::DailyCost => self.daily_cost.used > self.daily_cost.limit,
            LimitKind::MonthlyRequests => {
                self.monthly_requests.used > self.monthly_requests.limit
            }
            LimitKind::MonthlyTokens => self.monthly_tokens.used > self.monthly_tokens.limit,
            LimitKind::MonthlyCost => self.monthly_cost.used > self.monthly_cost.limit,
        }
    }
}

/// 准入决策（不持久化）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    pub usage: UsageSnapshot,
    pub next_reset: DateTime<Utc>,
}

/// 配额报告（供查询接口使用）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaReport {
    pub config: QuotaConfig,
    pub daily: DailyUsage,
    pub monthly: MonthlyUsage,
    pub next_daily_reset: DateTime<Utc>,
    pub next_monthly_reset: DateTime<Utc>,
}
