//! Provider Adapter Table
//!
//! 每个已知供应商一行：路径模板、认证位置、模型名编码和请求体格式。
//! 新增供应商只需要在 `ADAPTER_TABLE` 中加一行。

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::auth::{AuthInfo, AuthStrategy};
use super::transform;
use crate::provider::Provider;
use crate::proxy::error::ProxyError;
use crate::proxy::types::ChatCompletionRequest;

/// 供应商类型
///
/// 未知名称统一落到 `Unknown`，按 OpenAI 兼容格式处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Cohere,
    Meta,
    Unknown,
}

impl ProviderKind {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => ProviderKind::OpenAi,
            "anthropic" => ProviderKind::Anthropic,
            "google" => ProviderKind::Google,
            "cohere" => ProviderKind::Cohere,
            "meta" => ProviderKind::Meta,
            _ => ProviderKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Cohere => "cohere",
            ProviderKind::Meta => "meta",
            ProviderKind::Unknown => "unknown",
        }
    }

    /// 查表获取适配规则
    pub fn adapter(&self) -> &'static ProviderAdapter {
        ADAPTER_TABLE
            .iter()
            .find(|row| row.kind == *self)
            .unwrap_or(&ADAPTER_TABLE[0])
    }
}

/// 模型名编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelEncoding {
    Verbatim,
    /// 缺少前缀时补上
    Prefixed(&'static str),
}

impl ModelEncoding {
    pub fn encode(&self, model: &str) -> String {
        match self {
            ModelEncoding::Verbatim => model.to_string(),
            ModelEncoding::Prefixed(prefix) if model.starts_with(prefix) => model.to_string(),
            ModelEncoding::Prefixed(prefix) => format!("{prefix}{model}"),
        }
    }
}

/// 上游请求/响应体格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    OpenAiChat,
    AnthropicMessages,
    GoogleGenerateContent,
    CohereGenerate,
}

/// 单个供应商的适配规则
#[derive(Debug)]
pub struct ProviderAdapter {
    pub kind: ProviderKind,
    /// 相对 base_url 的路径，`{model}` 替换为编码后的模型名
    pub path: &'static str,
    pub auth: AuthStrategy,
    pub model_encoding: ModelEncoding,
    pub wire: WireFormat,
    pub extra_headers: &'static [(&'static str, &'static str)],
}

pub static ADAPTER_TABLE: [ProviderAdapter; 6] = [
    ProviderAdapter {
        kind: ProviderKind::OpenAi,
        path: "chat/completions",
        auth: AuthStrategy::Bearer,
        model_encoding: ModelEncoding::Verbatim,
        wire: WireFormat::OpenAiChat,
        extra_headers: &[],
    },
    ProviderAdapter {
        kind: ProviderKind::Anthropic,
        path: "v1/messages",
        auth: AuthStrategy::Header("x-api-key"),
        model_encoding: ModelEncoding::Verbatim,
        wire: WireFormat::AnthropicMessages,
        extra_headers: &[("anthropic-version", "2023-06-01")],
    },
    ProviderAdapter {
        kind: ProviderKind::Google,
        path: "v1beta/{model}:generateContent",
        auth: AuthStrategy::QueryParam("key"),
        model_encoding: ModelEncoding::Prefixed("models/"),
        wire: WireFormat::GoogleGenerateContent,
        extra_headers: &[],
    },
    ProviderAdapter {
        kind: ProviderKind::Cohere,
        path: "v1/generate",
        auth: AuthStrategy::Bearer,
        model_encoding: ModelEncoding::Verbatim,
        wire: WireFormat::CohereGenerate,
        extra_headers: &[],
    },
    ProviderAdapter {
        kind: ProviderKind::Meta,
        path: "chat/completions",
        auth: AuthStrategy::Bearer,
        model_encoding: ModelEncoding::Verbatim,
        wire: WireFormat::OpenAiChat,
        extra_headers: &[],
    },
    ProviderAdapter {
        kind: ProviderKind::Unknown,
        path: "chat/completions",
        auth: AuthStrategy::Bearer,
        model_encoding: ModelEncoding::Verbatim,
        wire: WireFormat::OpenAiChat,
        extra_headers: &[],
    },
];

/// 构建好的上游请求
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub kind: ProviderKind,
    pub wire: WireFormat,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Value,
    /// 遮蔽后的上游 Key，仅用于日志
    pub masked_key: String,
}

impl ProviderAdapter {
    pub fn build_url(&self, base_url: &str, model: &str) -> Result<Url, ProxyError> {
        let path = self.path.replace("{model}", &self.model_encoding.encode(model));
        let raw = format!("{}/{}", base_url.trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| ProxyError::ConfigError(format!("无效的上游地址 {raw}: {e}")))
    }

    /// 把统一请求转换为该供应商的上游请求
    pub fn build_request(
        &self,
        provider: &Provider,
        request: &ChatCompletionRequest,
        default_max_tokens: u32,
    ) -> Result<OutboundRequest, ProxyError> {
        let mut url = self.build_url(&provider.base_url, &request.model)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for &(name, value) in self.extra_headers {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        let auth = AuthInfo::new(provider.api_key.clone(), self.auth);
        auth.apply(&mut url, &mut headers)?;

        let model = self.model_encoding.encode(&request.model);
        let body = match self.wire {
            WireFormat::OpenAiChat => transform::openai_chat_body(request, &model)?,
            WireFormat::AnthropicMessages => {
                transform::anthropic_messages_body(request, &model, default_max_tokens)
            }
            WireFormat::GoogleGenerateContent => transform::google_generate_body(request),
            WireFormat::CohereGenerate => transform::cohere_generate_body(request, &model),
        };

        Ok(OutboundRequest {
            kind: self.kind,
            wire: self.wire,
            url,
            headers,
            body,
            masked_key: auth.masked_key(),
        })
    }
}
