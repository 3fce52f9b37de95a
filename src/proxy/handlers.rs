//! 请求处理器
//!
//! `/v1/chat/completions` 按固定顺序执行：
//! 认证 → 模型解析 → (开发模式模拟) → 成本估算 → 配额检查 → 限流 → 余额检查
//! → 记录限流命中 → 转发 → 提取实际用量 → 入队账本并累加配额 → 原样返回上游响应。
//! 转发之前的每一步失败都直接返回，不产生计费副作用。

use super::{
    forwarder::UpstreamResponse,
    handler_context::{authenticate, resolve_model},
    log_codes::{fwd as log_fwd, qta as log_qta, usg as log_usg},
    server::ProxyState,
    types::ChatCompletionRequest,
    usage::{CostBreakdown, CostCalculator, TokenEstimate, TokenUsage},
    ProxyError,
};
use crate::error::AppError;
use crate::ledger::LedgerEntry;
use crate::provider::ResolvedModel;
use crate::services::auth::Identity;
use crate::services::billing::enqueue_ledger_write;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_LEDGER_LIMIT: u32 = 50;
const MAX_LEDGER_LIMIT: u32 = 500;

/// 健康检查
pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// 处理 chat-completion 请求
pub async fn handle_chat_completions(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let identity = authenticate(&state, &headers)?;

    let request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::InvalidRequest(format!("请求体解析失败: {e}")))?;
    if request.model.trim().is_empty() {
        return Err(ProxyError::InvalidRequest("model 不能为空".to_string()));
    }

    let resolved = resolve_model(&state, &request.model)?;

    if !state.config.production && !resolved.provider.has_api_key() {
        log::info!(
            "[{}] 供应商 {} 未配置 Key，返回模拟响应",
            log_fwd::DEV_SIMULATED,
            resolved.provider.id
        );
        return Ok(Json(simulated_response(&request)).into_response());
    }

    let estimate = TokenEstimate::for_request(&request, state.config.default_max_tokens);
    let estimated_cost = price(
        &state,
        &resolved,
        estimate.input_tokens,
        estimate.output_tokens,
    )?;

    let decision = state
        .quota
        .check_quota(
            &identity.user_id,
            estimate.total_tokens(),
            estimated_cost.total_cost,
        )
        .map_err(|e| {
            log::error!("[{}] 配额检查失败: {e}", log_qta::CHECK_FAILED);
            ProxyError::from(e)
        })?;
    if !decision.allowed {
        return Err(ProxyError::QuotaExceeded(Box::new(decision)));
    }

    let quota_config = state.quota.get_user_quota(&identity.user_id)?;
    state.rate_limiter.check(
        &identity.user_id,
        quota_config.rate_limit_per_minute,
        quota_config.rate_limit_per_hour,
    )?;

    let (sufficient, balance) = state
        .balance
        .has_sufficient_balance(&identity.user_id, estimated_cost.total_cost)?;
    if !sufficient {
        return Err(ProxyError::InsufficientBalance {
            balance,
            required: estimated_cost.total_cost,
        });
    }
    state.rate_limiter.record(
        &identity.user_id,
        quota_config.rate_limit_per_minute,
        quota_config.rate_limit_per_hour,
    )?;

    let adapter = resolved.provider.kind().adapter();
    let outbound =
        adapter.build_request(&resolved.provider, &request, state.config.default_max_tokens)?;
    let upstream = state.forwarder.forward(&outbound).await?;

    let usage = TokenUsage::from_body(outbound.wire, &upstream.body, request.is_streaming())
        .unwrap_or_else(|| {
            log::warn!(
                "[{}] 上游响应缺少用量信息，使用估算值 (model={})",
                log_usg::USAGE_MISSING,
                resolved.model.name
            );
            TokenUsage {
                input_tokens: estimate.input_tokens,
                output_tokens: estimate.output_tokens,
                model: None,
            }
        });

    record_completed_usage(&state, &identity, &resolved, &usage, &estimated_cost).await;

    Ok(passthrough(upstream))
}

/// 按模型 id 计价；模型在解析之后被删除时视为未找到
fn price(
    state: &ProxyState,
    resolved: &ResolvedModel,
    input_tokens: u64,
    output_tokens: u64,
) -> Result<CostBreakdown, ProxyError> {
    CostCalculator::calculate_cost(&state.db, &resolved.model.id, input_tokens, output_tokens)
        .map_err(|e| match e {
            AppError::NotFound(_) => ProxyError::ModelNotFound(resolved.model.name.clone()),
            other => ProxyError::from(other),
        })
}

/// 写账本并累加配额；失败只记录日志
async fn record_completed_usage(
    state: &ProxyState,
    identity: &Identity,
    resolved: &ResolvedModel,
    usage: &TokenUsage,
    estimated_cost: &CostBreakdown,
) {
    let cost = match price(state, resolved, usage.input_tokens, usage.output_tokens) {
        Ok(cost) => cost.total_cost,
        Err(e) => {
            log::warn!(
                "[{}] 实际成本计算失败，使用估算成本: {e}",
                log_usg::PRICING_NOT_FOUND
            );
            estimated_cost.total_cost
        }
    };

    let mut entry = LedgerEntry::new(
        &identity.user_id,
        Some(&identity.api_key_id),
        &resolved.model.id,
        usage.input_tokens,
        usage.output_tokens,
        cost,
    )
    .with_metadata("provider", resolved.provider.name.clone())
    .with_metadata("requestId", uuid::Uuid::new_v4().to_string());
    if let Some(upstream_model) = &usage.model {
        entry = entry.with_metadata("upstreamModel", upstream_model.clone());
    }

    enqueue_ledger_write(state.ledger_queue.as_ref(), &state.db, entry).await;

    if let Err(e) = state.quota.record_usage(
        &identity.user_id,
        &resolved.model.id,
        usage.total_tokens(),
        cost,
    ) {
        log::error!(
            "[{}] 用户 {} 用量累加失败: {e}",
            log_qta::RECORD_FAILED,
            identity.user_id
        );
    }
}

/// 原样返回上游状态码与响应体
fn passthrough(upstream: UpstreamResponse) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
    let content_type = upstream
        .content_type
        .unwrap_or_else(|| "application/json".to_string());

    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

/// 开发模式下的模拟响应（OpenAI 格式，不计费）
fn simulated_response(request: &ChatCompletionRequest) -> Value {
    json!({
        "id": format!("chatcmpl-sim-{}", uuid::Uuid::new_v4().simple()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": request.model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": "This is a simulated response: no provider API key is configured."
            },
            "finish_reason": "stop"
        }],
        "usage": {
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "total_tokens": 0
        },
        "simulated": true
    })
}

/// 当前配额与用量
pub async fn get_quota(
    State(state): State<ProxyState>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let identity = authenticate(&state, &headers)?;
    let report = state.quota.quota_report(&identity.user_id)?;
    Ok(Json(report).into_response())
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub limit: Option<u32>,
}

/// 最近的账本条目
pub async fn get_ledger(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    Query(query): Query<LedgerQuery>,
) -> Result<Response, ProxyError> {
    let identity = authenticate(&state, &headers)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LEDGER_LIMIT)
        .clamp(1, MAX_LEDGER_LIMIT);
    let entries = state.db.list_ledger_entries(&identity.user_id, limit)?;
    Ok(Json(json!({ "entries": entries })).into_response())
}

/// 账户余额
pub async fn get_balance(
    State(state): State<ProxyState>,
    headers: HeaderMap,
) -> Result<Response, ProxyError> {
    let identity = authenticate(&state, &headers)?;
    let balance = state.balance.get_balance(&identity.user_id)?;
    Ok(Json(json!({ "balance": balance.to_string() })).into_response())
}
