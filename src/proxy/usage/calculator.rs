//! Cost Calculator - 计算 API 请求成本
//!
//! 使用高精度 Decimal 类型避免浮点数精度问题；价格单位为 USD / 1K tokens。

use crate::database::Database;
use crate::error::AppError;
use crate::provider::Model;
use crate::proxy::types::ChatCompletionRequest;
use rust_decimal::Decimal;
use serde::Serialize;

/// 成本明细
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub total_cost: Decimal,
}

/// 请求前的 token 估算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenEstimate {
    /// 输入按约 4 字符 1 token 向上取整再加 1；输出取请求声明的 max_tokens 或默认值
    pub fn for_request(request: &ChatCompletionRequest, default_max_tokens: u32) -> Self {
        let chars = request.concatenated_content().chars().count() as u64;
        Self {
            input_tokens: chars.div_ceil(4) + 1,
            output_tokens: u64::from(request.max_tokens.unwrap_or(default_max_tokens)),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// 成本计算器
pub struct CostCalculator;

impl CostCalculator {
    /// 计算请求成本
    ///
    /// - input_cost: input_tokens / 1000 × 输入单价
    /// - output_cost: output_tokens / 1000 × 输出单价
    pub fn calculate(model: &Model, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
        let thousand = Decimal::from(1_000);
        let input_cost = Decimal::from(input_tokens) * model.input_price_per_1k / thousand;
        let output_cost = Decimal::from(output_tokens) * model.output_price_per_1k / thousand;
        CostBreakdown {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }

    /// 按模型 id 查价后计算
    pub fn calculate_cost(
        db: &Database,
        model_id: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<CostBreakdown, AppError> {
        let model = db
            .get_model(model_id)?
            .ok_or_else(|| AppError::NotFound("model not found".to_string()))?;
        Ok(Self::calculate(&model, input_tokens, output_tokens))
    }
}
