use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::AppError;
use crate::quota::QuotaDecision;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("服务器已在运行")]
    AlreadyRunning,

    #[error("服务器未运行")]
    NotRunning,

    #[error("地址绑定失败: {0}")]
    BindFailed(String),

    #[error("认证失败: {0}")]
    Unauthorized(String),

    #[error("无效的请求: {0}")]
    InvalidRequest(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// 配额不足，携带完整的用量快照
    #[error("{}", .0.reason.map(|r| r.message()).unwrap_or("quota exceeded"))]
    QuotaExceeded(Box<QuotaDecision>),

    #[error("rate limit exceeded ({window})")]
    RateLimited {
        window: &'static str,
        retry_after_secs: u64,
    },

    #[error("insufficient balance: {balance} < {required}")]
    InsufficientBalance { balance: Decimal, required: Decimal },

    #[error("请求转发失败: {0}")]
    ForwardFailed(String),

    #[error("上游错误 (状态码 {status}): {body:?}")]
    UpstreamError { status: u16, body: Option<String> },

    #[error("超时: {0}")]
    Timeout(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("格式转换错误: {0}")]
    TransformError(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<AppError> for ProxyError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(_) | AppError::Lock(_) | AppError::Queue(_) | AppError::Io { .. } => {
                ProxyError::DatabaseError(err.to_string())
            }
            AppError::Config(msg) => ProxyError::ConfigError(msg),
            AppError::InvalidInput(msg) => ProxyError::InvalidRequest(msg),
            other => ProxyError::Internal(other.to_string()),
        }
    }
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::AlreadyRunning => StatusCode::CONFLICT,
            ProxyError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::ModelNotFound(_) | ProxyError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::QuotaExceeded(_) | ProxyError::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ProxyError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            ProxyError::ForwardFailed(_)
            | ProxyError::UpstreamError { .. }
            | ProxyError::Timeout(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BindFailed(_)
            | ProxyError::DatabaseError(_)
            | ProxyError::ConfigError(_)
            | ProxyError::TransformError(_)
            | ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Unauthorized(_) => "authentication_error",
            ProxyError::InvalidRequest(_) => "invalid_request_error",
            ProxyError::ModelNotFound(_) | ProxyError::ProviderNotFound(_) => "not_found_error",
            ProxyError::QuotaExceeded(_) => "quota_exceeded",
            ProxyError::RateLimited { .. } => "rate_limit_exceeded",
            ProxyError::InsufficientBalance { .. } => "insufficient_balance",
            ProxyError::ForwardFailed(_)
            | ProxyError::UpstreamError { .. }
            | ProxyError::Timeout(_) => "upstream_error",
            ProxyError::DatabaseError(_) => "persistence_error",
            _ => "proxy_error",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut error = json!({
            "message": self.to_string(),
            "type": self.error_type(),
        });

        match &self {
            ProxyError::QuotaExceeded(decision) => {
                error["usage"] = serde_json::to_value(&decision.usage).unwrap_or(Value::Null);
                error["nextReset"] = json!(decision.next_reset.to_rfc3339());
            }
            ProxyError::RateLimited {
                window,
                retry_after_secs,
            } => {
                error["window"] = json!(window);
                error["retryAfterSeconds"] = json!(retry_after_secs);
            }
            ProxyError::InsufficientBalance { balance, required } => {
                error["balance"] = json!(balance.to_string());
                error["required"] = json!(required.to_string());
            }
            ProxyError::UpstreamError {
                status: upstream_status,
                body,
            } => {
                // 上游响应体是 JSON 时原样放入，否则作为字符串
                let upstream_body = body.as_deref().map(|text| {
                    serde_json::from_str::<Value>(text).unwrap_or_else(|_| json!(text))
                });
                error["upstreamStatus"] = json!(upstream_status);
                error["upstreamBody"] = upstream_body.unwrap_or(Value::Null);
            }
            _ => {}
        }

        let mut response = (status, Json(json!({ "error": error }))).into_response();
        if let ProxyError::RateLimited {
            retry_after_secs, ..
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{DenialReason, LimitKind, LimitUsage, UsageSnapshot};

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn snapshot() -> UsageSnapshot {
        let count = LimitUsage { used: 3, limit: 3 };
        let cost = LimitUsage {
            used: Decimal::ONE,
            limit: Decimal::TEN,
        };
        UsageSnapshot {
            daily_requests: count,
            daily_tokens: count,
            daily_cost: cost,
            monthly_requests: count,
            monthly_tokens: count,
            monthly_cost: cost,
        }
    }

    #[tokio::test]
    async fn test_quota_exceeded_body_carries_snapshot() {
        let decision = QuotaDecision {
            allowed: false,
            reason: Some(DenialReason::Limit(LimitKind::DailyRequests)),
            usage: snapshot(),
            next_reset: "2026-10-17T00:00:00Z".parse().unwrap(),
        };
        let response = ProxyError::QuotaExceeded(Box::new(decision)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "daily request limit exceeded");
        assert_eq!(body["error"]["type"], "quota_exceeded");
        assert_eq!(body["error"]["usage"]["dailyRequests"]["limit"], 3);
        assert_eq!(body["error"]["usage"]["monthlyCost"]["limit"], "10");
        assert!(body["error"]["nextReset"]
            .as_str()
            .unwrap()
            .starts_with("2026-10-17T00:00:00"));
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let response = ProxyError::RateLimited {
            window: "minute",
            retry_after_secs: 12,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "12");
        let body = body_json(response).await;
        assert_eq!(body["error"]["retryAfterSeconds"], 12);
    }

    #[tokio::test]
    async fn test_upstream_error_is_bad_gateway() {
        let response = ProxyError::UpstreamError {
            status: 500,
            body: Some(r#"{"error":"boom"}"#.to_string()),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"]["upstreamStatus"], 500);
        assert_eq!(body["error"]["upstreamBody"]["error"], "boom");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::InsufficientBalance {
                balance: Decimal::ONE,
                required: Decimal::TWO,
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ProxyError::from(AppError::Database("locked".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::ModelNotFound("x".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        // 上游超时与其他上游失败一样按网关错误返回
        let timeout = ProxyError::Timeout("请求超时".to_string());
        assert_eq!(timeout.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(timeout.error_type(), "upstream_error");
        assert!(timeout.to_string().contains("超时"));
    }
}
