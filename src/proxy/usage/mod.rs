//! Proxy Usage Module
//!
//! 成本计算与上游响应的 token 用量提取

pub mod calculator;
pub mod parser;

pub use calculator::{CostBreakdown, CostCalculator, TokenEstimate};
pub use parser::TokenUsage;
