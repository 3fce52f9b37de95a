use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::proxy::providers::ProviderKind;

fn default_true() -> bool {
    true
}

/// 供应商结构体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: String,
    /// 供应商名称（如 "openai", "anthropic"），决定适配器
    pub name: String,
    /// 上游基础地址，如 `https://api.openai.com/v1`
    pub base_url: String,
    /// 上游 API Key；为空表示未配置真实 Key
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Provider {
    pub fn kind(&self) -> ProviderKind {
        ProviderKind::from_name(&self.name)
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// 模型目录条目
///
/// 价格单位为 USD / 1K tokens。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub id: String,
    /// 对外公开的模型名称（请求中的 `model` 字段）
    pub name: String,
    pub provider_id: String,
    pub input_price_per_1k: Decimal,
    pub output_price_per_1k: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// 已解析的模型及其供应商
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub model: Model,
    pub provider: Provider,
}
