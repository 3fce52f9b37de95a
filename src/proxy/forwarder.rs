//! 请求转发器
//!
//! 单次发送，不重试；失败立即返回。

use std::time::Duration;

use bytes::Bytes;
use reqwest::Client;

use super::log_codes::fwd as log_fwd;
use super::providers::OutboundRequest;
use super::ProxyError;

/// 上游响应（完整缓冲）
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct RequestForwarder {
    client: Client,
}

impl RequestForwarder {
    pub fn new(timeout: Duration) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::ConfigError(format!("创建 HTTP 客户端失败: {e}")))?;
        Ok(Self { client })
    }

    /// 发送上游请求；非 2xx 状态视为上游失败
    pub async fn forward(&self, outbound: &OutboundRequest) -> Result<UpstreamResponse, ProxyError> {
        let tag = outbound.kind.as_str();
        let key = &outbound.masked_key;
        log::debug!("[{tag}] 发送请求到: {} (key={key})", outbound.url.path());

        let response = self
            .client
            .post(outbound.url.clone())
            .headers(outbound.headers.clone())
            .json(&outbound.body)
            .send()
            .await
            .map_err(|e| {
                // 查询参数鉴权时 URL 带有明文 Key
                let e = e.without_url();
                log::error!(
                    "[{}] [{tag}] 请求失败 (key={key}): {e}",
                    log_fwd::UPSTREAM_FAILED
                );
                if e.is_timeout() {
                    ProxyError::Timeout(format!("请求超时: {e}"))
                } else if e.is_connect() {
                    ProxyError::ForwardFailed(format!("连接失败: {e}"))
                } else {
                    ProxyError::ForwardFailed(e.to_string())
                }
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if !status.is_success() {
            let body_text = response.text().await.ok();
            log::error!(
                "[{}] [{tag}] 上游错误 ({}, key={key}): {:?}",
                log_fwd::UPSTREAM_STATUS,
                status.as_u16(),
                body_text
            );
            return Err(ProxyError::UpstreamError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body = response.bytes().await.map_err(|e| {
            let e = e.without_url();
            log::error!(
                "[{}] [{tag}] 读取响应体失败 (key={key}): {e}",
                log_fwd::UPSTREAM_FAILED
            );
            if e.is_timeout() {
                ProxyError::Timeout(format!("读取响应超时: {e}"))
            } else {
                ProxyError::ForwardFailed(format!("读取响应失败: {e}"))
            }
        })?;

        Ok(UpstreamResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
