//! 请求体转换
//!
//! 把统一的 OpenAI chat 请求转换为各供应商的原生格式。

use crate::proxy::error::ProxyError;
use crate::proxy::types::ChatCompletionRequest;
use serde_json::{json, Map, Value};

/// OpenAI 兼容：原样透传，只替换模型名
pub fn openai_chat_body(request: &ChatCompletionRequest, model: &str) -> Result<Value, ProxyError> {
    let mut body = serde_json::to_value(request)
        .map_err(|e| ProxyError::TransformError(format!("序列化请求失败: {e}")))?;
    body["model"] = json!(model);
    Ok(body)
}

/// Anthropic Messages：system 消息提到顶层，`max_tokens` 必填
pub fn anthropic_messages_body(
    request: &ChatCompletionRequest,
    model: &str,
    default_max_tokens: u32,
) -> Value {
    let system = request
        .messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.text())
        .collect::<Vec<_>>()
        .join("\n");

    let messages: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| {
            let role = if m.role == "assistant" { "assistant" } else { "user" };
            json!({"role": role, "content": m.text()})
        })
        .collect();

    let mut body = Map::new();
    body.insert("model".to_string(), json!(model));
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert(
        "max_tokens".to_string(),
        json!(request.max_tokens.unwrap_or(default_max_tokens)),
    );
    if !system.is_empty() {
        body.insert("system".to_string(), json!(system));
    }
    insert_sampling(&mut body, request, "temperature", "top_p");
    if let Some(stream) = request.stream {
        body.insert("stream".to_string(), json!(stream));
    }
    Value::Object(body)
}

/// Google generateContent：`contents/parts`，assistant 角色改为 `model`
pub fn google_generate_body(request: &ChatCompletionRequest) -> Value {
    let system = request
        .messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| json!({"text": m.text()}))
        .collect::<Vec<_>>();

    let contents: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| {
            let role = if m.role == "assistant" { "model" } else { "user" };
            json!({"role": role, "parts": [{"text": m.text()}]})
        })
        .collect();

    let mut generation_config = Map::new();
    if let Some(max_tokens) = request.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    insert_sampling(&mut generation_config, request, "temperature", "topP");

    let mut body = Map::new();
    body.insert("contents".to_string(), Value::Array(contents));
    if !system.is_empty() {
        body.insert("systemInstruction".to_string(), json!({"parts": system}));
    }
    if !generation_config.is_empty() {
        body.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
    }
    Value::Object(body)
}

/// Cohere generate：消息拼接为单个 prompt
pub fn cohere_generate_body(request: &ChatCompletionRequest, model: &str) -> Value {
    let prompt = request
        .messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text()))
        .collect::<Vec<_>>()
        .join("\n");

    let mut body = Map::new();
    body.insert("model".to_string(), json!(model));
    body.insert("prompt".to_string(), json!(prompt));
    if let Some(max_tokens) = request.max_tokens {
        body.insert("max_tokens".to_string(), json!(max_tokens));
    }
    insert_sampling(&mut body, request, "temperature", "p");
    if let Some(stream) = request.stream {
        body.insert("stream".to_string(), json!(stream));
    }
    Value::Object(body)
}

fn insert_sampling(
    target: &mut Map<String, Value>,
    request: &ChatCompletionRequest,
    temperature_key: &str,
    top_p_key: &str,
) {
    if let Some(temperature) = request.temperature {
        target.insert(temperature_key.to_string(), json!(temperature));
    }
    if let Some(top_p) = request.top_p {
        target.insert(top_p_key.to_string(), json!(top_p));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChatCompletionRequest {
        serde_json::from_value(json!({
            "model": "any",
            "messages": [
                {"role": "system", "content": "You are terse."},
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello"},
                {"role": "user", "content": "Bye"}
            ],
            "temperature": 0.5,
            "top_p": 0.9,
            "user": "tracking-id"
        }))
        .unwrap()
    }

    #[test]
    fn test_openai_body_is_verbatim() {
        let body = openai_chat_body(&request(), "gpt-4o").unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"].as_array().unwrap().len(), 4);
        assert_eq!(body["user"], "tracking-id");
    }

    #[test]
    fn test_anthropic_body_lifts_system() {
        let body = anthropic_messages_body(&request(), "claude-3-5-sonnet", 512);
        assert_eq!(body["system"], "You are terse.");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["top_p"], 0.9);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["role"], "assistant");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_google_body_uses_model_role() {
        let body = google_generate_body(&request());
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[0]["parts"][0]["text"], "Hi");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are terse.");
        assert_eq!(body["generationConfig"]["topP"], 0.9);
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn test_cohere_body_flattens_prompt() {
        let body = cohere_generate_body(&request(), "command-r");
        assert_eq!(
            body["prompt"],
            "system: You are terse.\nuser: Hi\nassistant: Hello\nuser: Bye"
        );
        assert_eq!(body["p"], 0.9);
    }
}
