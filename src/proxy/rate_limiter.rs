//! 滑动窗口限流
//!
//! 按用户记录最近一分钟/一小时内被放行请求的时间戳。上限为 0 表示不限制。
//! `check` 只读；请求通过余额检查之后才 `record`，被拒绝的请求不占用窗口。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::ProxyError;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Default)]
struct UserWindow {
    hits: VecDeque<Instant>,
}

impl UserWindow {
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.hits.front() {
            if now.duration_since(*oldest) >= HOUR {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// `span` 内的命中数以及其中最早一次命中
    fn count_within(&self, now: Instant, span: Duration) -> (usize, Option<Instant>) {
        let mut count = 0;
        let mut oldest = None;
        for hit in self.hits.iter().rev() {
            if now.duration_since(*hit) < span {
                count += 1;
                oldest = Some(*hit);
            } else {
                break;
            }
        }
        (count, oldest)
    }
}

pub struct RateLimiter {
    windows: Mutex<HashMap<String, UserWindow>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, user_id: &str, per_minute: u32, per_hour: u32) -> Result<(), ProxyError> {
        self.check_at(user_id, per_minute, per_hour, Instant::now())
    }

    /// 只检查不记录；放行后由调用方 `record`
    pub fn check_at(
        &self,
        user_id: &str,
        per_minute: u32,
        per_hour: u32,
        now: Instant,
    ) -> Result<(), ProxyError> {
        if per_minute == 0 && per_hour == 0 {
            return Ok(());
        }

        let mut windows = self.lock()?;
        let Some(window) = windows.get_mut(user_id) else {
            return Ok(());
        };
        window.prune(now);

        for (limit, span, name) in [(per_minute, MINUTE, "minute"), (per_hour, HOUR, "hour")] {
            if limit == 0 {
                continue;
            }
            let (count, oldest) = window.count_within(now, span);
            if count >= limit as usize {
                let retry_after_secs = oldest
                    .map(|hit| span.saturating_sub(now.duration_since(hit)))
                    .map(|wait| wait.as_secs().max(1))
                    .unwrap_or(1);
                return Err(ProxyError::RateLimited {
                    window: name,
                    retry_after_secs,
                });
            }
        }
        Ok(())
    }

    pub fn record(&self, user_id: &str, per_minute: u32, per_hour: u32) -> Result<(), ProxyError> {
        self.record_at(user_id, per_minute, per_hour, Instant::now())
    }

    /// 记录一次已放行的请求；不限流的用户不记录
    pub fn record_at(
        &self,
        user_id: &str,
        per_minute: u32,
        per_hour: u32,
        now: Instant,
    ) -> Result<(), ProxyError> {
        if per_minute == 0 && per_hour == 0 {
            return Ok(());
        }

        let mut windows = self.lock()?;
        let window = windows.entry(user_id.to_string()).or_default();
        window.prune(now);
        window.hits.push_back(now);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, UserWindow>>, ProxyError> {
        self.windows
            .lock()
            .map_err(|e| ProxyError::Internal(format!("限流器锁获取失败: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admit(limiter: &RateLimiter, user: &str, per_minute: u32, per_hour: u32, at: Instant) {
        limiter.check_at(user, per_minute, per_hour, at).unwrap();
        limiter.record_at(user, per_minute, per_hour, at).unwrap();
    }

    #[test]
    fn test_zero_means_unlimited() {
        let limiter = RateLimiter::new();
        for _ in 0..100 {
            assert!(limiter.check("u1", 0, 0).is_ok());
            assert!(limiter.record("u1", 0, 0).is_ok());
        }
        assert!(limiter.windows.lock().unwrap().is_empty());
    }

    #[test]
    fn test_minute_window_slides() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        for i in 0..3 {
            admit(&limiter, "u1", 3, 0, start + Duration::from_secs(i));
        }

        let denied = limiter.check_at("u1", 3, 0, start + Duration::from_secs(10));
        match denied {
            Err(ProxyError::RateLimited {
                window,
                retry_after_secs,
            }) => {
                assert_eq!(window, "minute");
                assert_eq!(retry_after_secs, 50);
            }
            other => panic!("expected rate limit, got {other:?}"),
        }

        // 第一个命中离开窗口后放行
        assert!(limiter
            .check_at("u1", 3, 0, start + Duration::from_secs(60))
            .is_ok());
        // 其他用户互不影响
        assert!(limiter
            .check_at("u2", 3, 0, start + Duration::from_secs(10))
            .is_ok());
    }

    #[test]
    fn test_check_alone_consumes_nothing() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        for i in 0..5 {
            assert!(limiter
                .check_at("u1", 1, 0, start + Duration::from_secs(i))
                .is_ok());
        }

        limiter
            .record_at("u1", 1, 0, start + Duration::from_secs(5))
            .unwrap();
        assert!(matches!(
            limiter.check_at("u1", 1, 0, start + Duration::from_secs(6)),
            Err(ProxyError::RateLimited { window: "minute", .. })
        ));
    }

    #[test]
    fn test_hour_limit_applies_after_minute() {
        let limiter = RateLimiter::new();
        let start = Instant::now();
        for i in 0..2 {
            admit(&limiter, "u1", 10, 2, start + Duration::from_secs(i * 120));
        }
        let denied = limiter.check_at("u1", 10, 2, start + Duration::from_secs(600));
        assert!(matches!(
            denied,
            Err(ProxyError::RateLimited { window: "hour", .. })
        ));
    }
}
