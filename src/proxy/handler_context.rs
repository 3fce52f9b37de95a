//! 请求上下文模块
//!
//! 认证与模型解析，供各处理器共用

use axum::http::HeaderMap;

use crate::provider::ResolvedModel;
use crate::proxy::{server::ProxyState, ProxyError};
use crate::services::auth::Identity;

/// 从 `Authorization: Bearer` 或 `x-api-key` 中取出调用方 Key
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(|v| v.trim().to_string());

    bearer
        .or_else(|| {
            headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        })
        .filter(|key| !key.is_empty())
}

/// 认证调用方
pub fn authenticate(state: &ProxyState, headers: &HeaderMap) -> Result<Identity, ProxyError> {
    let raw = extract_api_key(headers)
        .ok_or_else(|| ProxyError::Unauthorized("missing API key".to_string()))?;
    state
        .auth
        .authenticate(&raw)?
        .ok_or_else(|| ProxyError::Unauthorized("invalid API key".to_string()))
}

/// 按公开名称解析启用的模型及其供应商
pub fn resolve_model(state: &ProxyState, name: &str) -> Result<ResolvedModel, ProxyError> {
    let model = state
        .db
        .find_active_model_by_name(name)?
        .ok_or_else(|| ProxyError::ModelNotFound(name.to_string()))?;
    let provider = state
        .db
        .get_provider(&model.provider_id)?
        .filter(|p| p.active)
        .ok_or_else(|| ProxyError::ProviderNotFound(model.provider_id.clone()))?;
    Ok(ResolvedModel { model, provider })
}
