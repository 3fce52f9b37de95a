//! Response Parser - 从上游响应中提取 token 使用量
//!
//! 支持的格式：
//! - OpenAI Chat Completions（非流式和流式）
//! - Anthropic Messages（非流式和流式）
//! - Google generateContent
//! - Cohere generate

use crate::proxy::providers::WireFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token 使用量统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// 从响应中提取的实际模型名称（如果可用）
    pub model: Option<String>,
}

fn response_model(body: &Value) -> Option<String> {
    body.get("model")
        .or_else(|| body.get("modelVersion"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// 按上游格式解析响应体
    ///
    /// 流式请求的响应体为缓冲后的完整 SSE 文本。
    pub fn from_body(wire: WireFormat, body: &[u8], streaming: bool) -> Option<Self> {
        if streaming {
            let text = std::str::from_utf8(body).ok()?;
            return Self::from_sse_text(wire, text);
        }
        let value: Value = serde_json::from_slice(body).ok()?;
        Self::from_response(wire, &value)
    }

    pub fn from_response(wire: WireFormat, body: &Value) -> Option<Self> {
        match wire {
            WireFormat::OpenAiChat => Self::from_openai_response(body),
            WireFormat::AnthropicMessages => Self::from_anthropic_response(body),
            WireFormat::GoogleGenerateContent => Self::from_google_response(body),
            WireFormat::CohereGenerate => Self::from_cohere_response(body),
        }
    }

    /// 从 OpenAI Chat Completions API 响应解析 (prompt_tokens, completion_tokens)
    pub fn from_openai_response(body: &Value) -> Option<Self> {
        let usage = body.get("usage")?;
        Some(Self {
            input_tokens: usage.get("prompt_tokens")?.as_u64()?,
            output_tokens: usage.get("completion_tokens")?.as_u64()?,
            model: response_model(body),
        })
    }

    /// 从 Anthropic Messages API 非流式响应解析
    pub fn from_anthropic_response(body: &Value) -> Option<Self> {
        let usage = body.get("usage")?;
        Some(Self {
            input_tokens: usage.get("input_tokens")?.as_u64()?,
            output_tokens: usage.get("output_tokens")?.as_u64()?,
            model: response_model(body),
        })
    }

    /// 从 Google generateContent 响应解析 (usageMetadata)
    pub fn from_google_response(body: &Value) -> Option<Self> {
        let usage = body.get("usageMetadata")?;
        let input_tokens = usage.get("promptTokenCount")?.as_u64()?;
        let output_tokens = usage
            .get("candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .or_else(|| {
                let total = usage.get("totalTokenCount")?.as_u64()?;
                Some(total.saturating_sub(input_tokens))
            })
            .unwrap_or(0);
        Some(Self {
            input_tokens,
            output_tokens,
            model: response_model(body),
        })
    }

    /// 从 Cohere generate 响应解析 (meta.billed_units)
    pub fn from_cohere_response(body: &Value) -> Option<Self> {
        let units = body.get("meta")?.get("billed_units")?;
        Some(Self {
            input_tokens: units.get("input_tokens")?.as_u64()?,
            output_tokens: units.get("output_tokens")?.as_u64()?,
            model: None,
        })
    }

    /// 从 Anthropic 流式事件解析
    ///
    /// `message_start` 携带 input_tokens，`message_delta` 携带最终 output_tokens。
    pub fn from_anthropic_stream_events(events: &[Value]) -> Option<Self> {
        let mut usage = Self::default();
        for event in events {
            match event.get("type").and_then(|v| v.as_str()) {
                Some("message_start") => {
                    let message = event.get("message");
                    if let Some(m) = message.and_then(response_model) {
                        usage.model = Some(m);
                    }
                    if let Some(input) = message
                        .and_then(|m| m.get("usage"))
                        .and_then(|u| u.get("input_tokens"))
                        .and_then(|v| v.as_u64())
                    {
                        usage.input_tokens = input;
                    }
                }
                Some("message_delta") => {
                    if let Some(output) = event
                        .get("usage")
                        .and_then(|u| u.get("output_tokens"))
                        .and_then(|v| v.as_u64())
                    {
                        usage.output_tokens = output;
                    }
                }
                _ => {}
            }
        }

        if usage.input_tokens > 0 || usage.output_tokens > 0 {
            Some(usage)
        } else {
            None
        }
    }

    /// 从缓冲的 SSE 文本解析：取最后一个携带用量的 `data:` 事件
    pub fn from_sse_text(wire: WireFormat, text: &str) -> Option<Self> {
        let events: Vec<Value> = text
            .lines()
            .filter_map(|line| line.trim().strip_prefix("data:"))
            .map(str::trim)
            .filter(|data| !data.is_empty() && *data != "[DONE]")
            .filter_map(|data| serde_json::from_str(data).ok())
            .collect();

        if wire == WireFormat::AnthropicMessages {
            return Self::from_anthropic_stream_events(&events);
        }
        events
            .iter()
            .rev()
            .find_map(|event| Self::from_response(wire, event))
    }
}
