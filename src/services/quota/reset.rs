//! 窗口与重置时间计算
//!
//! 所有日期都在用户配置的时区内计算，再转换回 UTC。

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::proxy::log_codes::qta as log_qta;

/// 解析 IANA 时区，未知标识回退到 UTC
pub fn parse_timezone(name: &str) -> Tz {
    match name.trim().parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            log::warn!("[{}] 未知时区 '{name}'，使用 UTC", log_qta::TIMEZONE_FALLBACK);
            Tz::UTC
        }
    }
}

/// 当前日窗口与月窗口的键：(`YYYY-MM-DD`, `YYYY-MM`)
pub fn period_keys(now: DateTime<Utc>, tz: Tz) -> (String, String) {
    let local = now.with_timezone(&tz);
    (
        local.format("%Y-%m-%d").to_string(),
        local.format("%Y-%m").to_string(),
    )
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(first), Some(next_first)) => (next_first - first).num_days() as u32,
        _ => 28,
    }
}

/// 本地日期零点对应的 UTC 时间
///
/// 零点落在夏令时空档时顺延一小时。
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    let resolved = match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz.from_local_datetime(&(naive + Duration::hours(1))).earliest(),
    };
    resolved
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// 下一次日重置：本地“明天”零点
pub fn next_daily_reset(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let tomorrow = (now.with_timezone(&tz) + Duration::days(1)).date_naive();
    local_midnight(tomorrow, tz)
}

/// 下一次月重置
///
/// 重置日超过当月天数时取当月最后一天；当前时间已到达本月重置点则顺延到下月。
pub fn next_monthly_reset(now: DateTime<Utc>, tz: Tz, reset_day: u8) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let reset_day = u32::from(reset_day.clamp(1, 31));

    let candidate_in = |year: i32, month: u32| {
        let day = reset_day.min(days_in_month(year, month));
        NaiveDate::from_ymd_opt(year, month, day).map(|date| local_midnight(date, tz))
    };

    let (year, month) = (local.year(), local.month());
    if let Some(candidate) = candidate_in(year, month) {
        if now < candidate {
            return candidate;
        }
    }

    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    candidate_in(next_year, next_month).unwrap_or_else(|| now + Duration::days(31))
}
