//! 配额引擎
//!
//! 根据用户配额配置和当前日/月窗口用量做准入判定，并在请求完成后累加用量。
//!
//! 判定与累加是两次独立调用：同一用户的并发请求可能在两者之间被共同放行，
//! 累加本身在存储层是原子的，计数不会丢失或重复。

pub mod reset;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::database::Database;
use crate::error::AppError;
use crate::proxy::log_codes::qta as log_qta;
use crate::quota::{
    DenialReason, LimitKind, ModelUsage, QuotaConfig, QuotaDecision, QuotaDefaults, QuotaReport,
    UsageSnapshot, UsageWindow, WindowClass,
};

pub struct QuotaEngine {
    db: Arc<Database>,
    defaults: QuotaDefaults,
}

impl QuotaEngine {
    pub fn new(db: Arc<Database>, defaults: QuotaDefaults) -> Self {
        Self { db, defaults }
    }

    /// 获取用户配额配置，不存在时按系统默认值创建
    pub fn get_user_quota(&self, user_id: &str) -> Result<QuotaConfig, AppError> {
        if let Some(config) = self.db.get_quota_config(user_id)? {
            return Ok(config);
        }
        let config = QuotaConfig::from_defaults(user_id, &self.defaults);
        let stored = self.db.get_or_insert_quota_config(&config)?;
        log::debug!("已为用户 {user_id} 创建默认配额");
        Ok(stored)
    }

    /// 覆盖用户配额配置
    pub fn update_user_quota(&self, mut config: QuotaConfig) -> Result<QuotaConfig, AppError> {
        if config.user_id.trim().is_empty() {
            return Err(AppError::InvalidInput("user_id 不能为空".to_string()));
        }
        if !(1..=31).contains(&config.reset_day) {
            return Err(AppError::InvalidInput(format!(
                "reset_day 超出范围: {}",
                config.reset_day
            )));
        }

        let now = Utc::now().timestamp();
        config.created_at = self
            .db
            .get_quota_config(&config.user_id)?
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        config.updated_at = now;

        self.db.save_quota_config(&config)?;
        log::info!("用户 {} 的配额已更新", config.user_id);
        Ok(config)
    }

    pub fn check_quota(
        &self,
        user_id: &str,
        tokens: u64,
        cost: Decimal,
    ) -> Result<QuotaDecision, AppError> {
        self.check_quota_at(user_id, tokens, cost, Utc::now())
    }

    /// 准入判定
    ///
    /// 未激活优先于所有窗口检查；六个上限按固定顺序评估，第一个超出的决定拒绝原因。
    pub fn check_quota_at(
        &self,
        user_id: &str,
        tokens: u64,
        cost: Decimal,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision, AppError> {
        let config = self.get_user_quota(user_id)?;
        let tz = reset::parse_timezone(&config.timezone);
        let (daily, monthly) = self.current_windows(user_id, now, tz)?;
        let usage = UsageSnapshot::new(&config, &daily, &monthly);

        if !config.active {
            return Ok(QuotaDecision {
                allowed: false,
                reason: Some(DenialReason::Inactive),
                usage,
                next_reset: reset::next_daily_reset(now, tz),
            });
        }

        let violated = LimitKind::ORDERED
            .into_iter()
            .find(|kind| usage.exceeds_with(*kind, tokens, cost));

        match violated {
            Some(kind) => {
                log::info!(
                    "[{}] 用户 {user_id} 配额不足: {}",
                    log_qta::DENIED,
                    kind.message()
                );
                let next_reset = match kind.window() {
                    WindowClass::Daily => reset::next_daily_reset(now, tz),
                    WindowClass::Monthly => reset::next_monthly_reset(now, tz, config.reset_day),
                };
                Ok(QuotaDecision {
                    allowed: false,
                    reason: Some(DenialReason::Limit(kind)),
                    usage,
                    next_reset,
                })
            }
            None => Ok(QuotaDecision {
                allowed: true,
                reason: None,
                usage,
                next_reset: reset::next_daily_reset(now, tz),
            }),
        }
    }

    pub fn record_usage(
        &self,
        user_id: &str,
        model_id: &str,
        tokens: u64,
        cost: Decimal,
    ) -> Result<(), AppError> {
        self.record_usage_at(user_id, model_id, &ModelUsage::single(tokens, cost), Utc::now())
    }

    /// 累加日/月用量，并在达到上限时置位对应窗口的超限标记
    pub fn record_usage_at(
        &self,
        user_id: &str,
        model_id: &str,
        delta: &ModelUsage,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let config = self.get_user_quota(user_id)?;
        let tz = reset::parse_timezone(&config.timezone);
        let (day, month) = reset::period_keys(now, tz);

        let daily = self
            .db
            .increment_usage(WindowClass::Daily, user_id, &day, model_id, delta)?;
        let monthly = self
            .db
            .increment_usage(WindowClass::Monthly, user_id, &month, model_id, delta)?;

        let usage = UsageSnapshot::new(&config, &daily, &monthly);
        for (class, window, period) in [
            (WindowClass::Daily, &daily, &day),
            (WindowClass::Monthly, &monthly, &month),
        ] {
            let crossed = LimitKind::ORDERED
                .into_iter()
                .any(|kind| kind.window() == class && usage.crossed(kind));
            if crossed && !window.exceeded {
                self.db.mark_usage_exceeded(class, user_id, period)?;
                log::info!(
                    "[{}] 用户 {user_id} 的{}窗口 {period} 已超出上限",
                    log_qta::EXCEEDED_MARKED,
                    class.as_str()
                );
            }
        }
        Ok(())
    }

    pub fn reset_daily_quota(&self, user_id: &str) -> Result<(), AppError> {
        self.reset_window(user_id, WindowClass::Daily, Utc::now())
    }

    pub fn reset_monthly_quota(&self, user_id: &str) -> Result<(), AppError> {
        self.reset_window(user_id, WindowClass::Monthly, Utc::now())
    }

    fn reset_window(
        &self,
        user_id: &str,
        class: WindowClass,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let config = self.get_user_quota(user_id)?;
        let tz = reset::parse_timezone(&config.timezone);
        let (day, month) = reset::period_keys(now, tz);
        let period = match class {
            WindowClass::Daily => day,
            WindowClass::Monthly => month,
        };
        self.db.reset_usage_window(class, user_id, &period)?;
        log::info!("用户 {user_id} 的{}用量已清零 ({period})", class.as_str());
        Ok(())
    }

    /// 配额报告：配置、当前窗口用量及下一次重置时间
    pub fn quota_report(&self, user_id: &str) -> Result<QuotaReport, AppError> {
        let now = Utc::now();
        let config = self.get_user_quota(user_id)?;
        let tz = reset::parse_timezone(&config.timezone);
        let (daily, monthly) = self.current_windows(user_id, now, tz)?;
        Ok(QuotaReport {
            next_daily_reset: reset::next_daily_reset(now, tz),
            next_monthly_reset: reset::next_monthly_reset(now, tz, config.reset_day),
            config,
            daily,
            monthly,
        })
    }

    fn current_windows(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        tz: chrono_tz::Tz,
    ) -> Result<(UsageWindow, UsageWindow), AppError> {
        let (day, month) = reset::period_keys(now, tz);
        let daily = self
            .db
            .get_usage_window(WindowClass::Daily, user_id, &day)?
            .unwrap_or_else(|| UsageWindow::empty(user_id, &day));
        let monthly = self
            .db
            .get_usage_window(WindowClass::Monthly, user_id, &month)?
            .unwrap_or_else(|| UsageWindow::empty(user_id, &month));
        Ok((daily, monthly))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> QuotaEngine {
        QuotaEngine::new(
            Arc::new(Database::memory().expect("memory db")),
            QuotaDefaults::default(),
        )
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_lazy_default_config() {
        let engine = engine();
        let config = engine.get_user_quota("u1").unwrap();
        assert_eq!(config.daily_request_limit, 1_000);
        assert!(config.active);
        assert_eq!(engine.get_user_quota("u1").unwrap(), config);
    }

    #[test]
    fn test_inactive_quota_is_denied_first() {
        let engine = engine();
        let mut config = engine.get_user_quota("u1").unwrap();
        config.active = false;
        config.daily_request_limit = 0;
        engine.update_user_quota(config).unwrap();

        let decision = engine.check_quota("u1", 0, Decimal::ZERO).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenialReason::Inactive));
        assert_eq!(decision.reason.unwrap().to_string(), "quota is not active");
    }

    #[test]
    fn test_exactly_n_requests_admitted() {
        let engine = engine();
        let mut config = engine.get_user_quota("u1").unwrap();
        config.daily_request_limit = 3;
        engine.update_user_quota(config).unwrap();

        let now = at("2026-10-16T10:00:00Z");
        for _ in 0..3 {
            let decision = engine
                .check_quota_at("u1", 10, Decimal::new(1, 3), now)
                .unwrap();
            assert!(decision.allowed);
            engine
                .record_usage_at("u1", "m1", &ModelUsage::single(10, Decimal::new(1, 3)), now)
                .unwrap();
        }

        let decision = engine
            .check_quota_at("u1", 10, Decimal::new(1, 3), now)
            .unwrap();
        assert!(!decision.allowed);
        assert_eq!(
            decision.reason,
            Some(DenialReason::Limit(LimitKind::DailyRequests))
        );
        assert_eq!(decision.usage.daily_requests.used, 3);
        assert_eq!(decision.next_reset, at("2026-10-17T00:00:00Z"));

        let daily = engine
            .db
            .get_usage_window(WindowClass::Daily, "u1", "2026-10-16")
            .unwrap()
            .unwrap();
        // 恰好用满，没有越过上限
        assert!(!daily.exceeded);
    }

    #[test]
    fn test_exceeded_flag_set_when_actual_usage_crosses_limit() {
        let engine = engine();
        let mut config = engine.get_user_quota("u1").unwrap();
        config.daily_token_limit = 100;
        engine.update_user_quota(config).unwrap();

        let now = at("2026-10-16T10:00:00Z");
        assert!(engine.check_quota_at("u1", 60, Decimal::ZERO, now).unwrap().allowed);
        engine
            .record_usage_at("u1", "m1", &ModelUsage::single(100, Decimal::ZERO), now)
            .unwrap();
        let daily = engine
            .db
            .get_usage_window(WindowClass::Daily, "u1", "2026-10-16")
            .unwrap()
            .unwrap();
        assert!(!daily.exceeded);

        // 上游实际用量超出估算，越过了每日 token 上限
        engine
            .record_usage_at("u1", "m1", &ModelUsage::single(40, Decimal::ZERO), now)
            .unwrap();
        let daily = engine
            .db
            .get_usage_window(WindowClass::Daily, "u1", "2026-10-16")
            .unwrap()
            .unwrap();
        assert!(daily.exceeded);
        assert_eq!(daily.tokens, 140);
        let monthly = engine
            .db
            .get_usage_window(WindowClass::Monthly, "u1", "2026-10")
            .unwrap()
            .unwrap();
        assert!(!monthly.exceeded);
    }

    #[test]
    fn test_first_violated_ceiling_wins() {
        let engine = engine();
        let mut config = engine.get_user_quota("u1").unwrap();
        config.daily_token_limit = 100;
        config.monthly_request_limit = 0;
        engine.update_user_quota(config).unwrap();

        let now = at("2026-10-16T10:00:00Z");
        let decision = engine
            .check_quota_at("u1", 500, Decimal::ZERO, now)
            .unwrap();
        assert_eq!(
            decision.reason,
            Some(DenialReason::Limit(LimitKind::DailyTokens))
        );

        // 只超出月度上限时，重置时间取月窗口
        let decision = engine.check_quota_at("u1", 1, Decimal::ZERO, now).unwrap();
        assert_eq!(
            decision.reason,
            Some(DenialReason::Limit(LimitKind::MonthlyRequests))
        );
        assert_eq!(decision.next_reset, at("2026-11-01T00:00:00Z"));
        assert_eq!(decision.usage.monthly_requests.limit, 0);
    }

    #[test]
    fn test_record_usage_is_order_independent() {
        let forward = engine();
        let reverse = engine();
        let now = at("2026-10-16T10:00:00Z");
        let a = ModelUsage::single(100, Decimal::new(15, 3));
        let b = ModelUsage::single(40, Decimal::new(7, 3));

        forward.record_usage_at("u1", "m1", &a, now).unwrap();
        forward.record_usage_at("u1", "m2", &b, now).unwrap();
        reverse.record_usage_at("u1", "m2", &b, now).unwrap();
        reverse.record_usage_at("u1", "m1", &a, now).unwrap();

        for class in [WindowClass::Daily, WindowClass::Monthly] {
            let period = if class == WindowClass::Daily {
                "2026-10-16"
            } else {
                "2026-10"
            };
            let x = forward.db.get_usage_window(class, "u1", period).unwrap().unwrap();
            let y = reverse.db.get_usage_window(class, "u1", period).unwrap().unwrap();
            assert_eq!((x.requests, x.tokens, x.cost), (y.requests, y.tokens, y.cost));
            assert_eq!(x.tokens, 140);
            for model in ["m1", "m2"] {
                assert_eq!(x.model_usage[model], y.model_usage[model]);
            }
        }
    }

    #[test]
    fn test_reset_daily_leaves_monthly() {
        let engine = engine();
        engine.record_usage("u1", "m1", 10, Decimal::ONE).unwrap();
        engine.reset_daily_quota("u1").unwrap();

        let report = engine.quota_report("u1").unwrap();
        assert_eq!(report.daily.requests, 0);
        assert!(report.daily.model_usage.is_empty());
        assert_eq!(report.monthly.requests, 1);
        assert_eq!(report.monthly.model_usage["m1"].tokens, 10);
        assert!(report.next_daily_reset > Utc::now());
        assert!(report.next_monthly_reset > Utc::now());

        engine.reset_monthly_quota("u1").unwrap();
        assert_eq!(engine.quota_report("u1").unwrap().monthly.requests, 0);
    }

    #[test]
    fn test_update_rejects_bad_reset_day() {
        let engine = engine();
        let mut config = engine.get_user_quota("u1").unwrap();
        config.reset_day = 0;
        assert!(matches!(
            engine.update_user_quota(config),
            Err(AppError::InvalidInput(_))
        ));
    }
}
