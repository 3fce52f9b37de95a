//! 账本条目
//!
//! 已计价的用量事件，只追加不修改。条目 id 在入队前生成，
//! 队列重复投递时按 id 去重。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,
    pub model_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost: Decimal,
    /// 供应商名称、请求 id 等
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: i64,
}

impl LedgerEntry {
    pub fn new(
        user_id: &str,
        api_key_id: Option<&str>,
        model_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        cost: Decimal,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            api_key_id: api_key_id.map(str::to_string),
            model_id: model_id.to_string(),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
            cost,
            metadata: Map::new(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}
