//! Authentication Types
//!
//! 定义认证信息和认证位置，不同上游供应商的 Key 放在不同位置。

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use url::Url;

use crate::proxy::error::ProxyError;

/// 认证位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStrategy {
    /// `Authorization: Bearer <api_key>`（OpenAI、Cohere 等）
    Bearer,
    /// 自定义请求头，如 Anthropic 的 `x-api-key`
    Header(&'static str),
    /// URL 查询参数，如 Google 的 `?key=`
    QueryParam(&'static str),
}

/// 认证信息
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub api_key: String,
    pub strategy: AuthStrategy,
}

impl AuthInfo {
    pub fn new(api_key: String, strategy: AuthStrategy) -> Self {
        Self { api_key, strategy }
    }

    /// 将 Key 写入请求头或 URL
    pub fn apply(&self, url: &mut Url, headers: &mut HeaderMap) -> Result<(), ProxyError> {
        match self.strategy {
            AuthStrategy::Bearer => {
                let value = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                    .map_err(|e| ProxyError::ConfigError(format!("API Key 含非法字符: {e}")))?;
                headers.insert(AUTHORIZATION, value);
            }
            AuthStrategy::Header(name) => {
                let value = HeaderValue::from_str(&self.api_key)
                    .map_err(|e| ProxyError::ConfigError(format!("API Key 含非法字符: {e}")))?;
                headers.insert(HeaderName::from_static(name), value);
            }
            AuthStrategy::QueryParam(name) => {
                url.query_pairs_mut().append_pair(name, &self.api_key);
            }
        }
        Ok(())
    }

    /// 返回遮蔽后的 API Key（用于日志输出）
    ///
    /// 显示前4位和后4位，中间用 `...` 代替
    /// 如果 key 长度不足8位，则返回 `***`
    pub fn masked_key(&self) -> String {
        if self.api_key.chars().count() > 8 {
            let prefix: String = self.api_key.chars().take(4).collect();
            let suffix: String = self
                .api_key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("{prefix}...{suffix}")
        } else {
            "***".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_key_long() {
        let auth = AuthInfo::new("sk-1234567890abcdef".to_string(), AuthStrategy::Bearer);
        assert_eq!(auth.masked_key(), "sk-1...cdef");
    }

    #[test]
    fn test_masked_key_exactly_8() {
        let auth = AuthInfo::new("12345678".to_string(), AuthStrategy::Bearer);
        assert_eq!(auth.masked_key(), "***");
    }

    #[test]
    fn test_masked_key_utf8_safe() {
        let auth = AuthInfo::new("测试⚠️1234567890".to_string(), AuthStrategy::Bearer);
        assert!(!auth.masked_key().is_empty());
    }

    #[test]
    fn test_apply_query_param_leaves_headers_empty() {
        let auth = AuthInfo::new("g-key".to_string(), AuthStrategy::QueryParam("key"));
        let mut url = Url::parse("https://example.com/v1beta/models/x:generateContent").unwrap();
        let mut headers = HeaderMap::new();
        auth.apply(&mut url, &mut headers).unwrap();

        assert_eq!(url.query(), Some("key=g-key"));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_apply_custom_header() {
        let auth = AuthInfo::new("a-key".to_string(), AuthStrategy::Header("x-api-key"));
        let mut url = Url::parse("https://example.com/v1/messages").unwrap();
        let mut headers = HeaderMap::new();
        auth.apply(&mut url, &mut headers).unwrap();

        assert_eq!(headers.get("x-api-key").unwrap(), "a-key");
        assert!(headers.get(AUTHORIZATION).is_none());
        assert!(url.query().is_none());
    }
}
