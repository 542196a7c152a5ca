use crate::models::MatchStatus;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 差异计算结果
///
/// 金额、数量为带符号的差值；`*_pct` 为相对订单的带符号比例；
/// 日期差为带符号天数 (负数表示发票早于参考日期)。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceResult {
    pub amount_variance: BigDecimal,
    pub amount_pct: BigDecimal,
    pub quantity_variance: BigDecimal,
    pub quantity_pct: BigDecimal,
    pub date_variance: i64,
}

/// 评分分类，持久化为 match_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Matched,
    Partial,
    Exception,
}

impl From<Classification> for MatchStatus {
    fn from(c: Classification) -> Self {
        match c {
            Classification::Matched => MatchStatus::Matched,
            Classification::Partial => MatchStatus::Partial,
            Classification::Exception => MatchStatus::Exception,
        }
    }
}

/// 评分结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub within_tolerance: bool,
    pub confidence_score: f64,
    pub classification: Classification,
}

/// 一次完整评估 (纯计算，未持久化)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub variance: VarianceResult,
    pub score: MatchScore,
    pub exception_reason: Option<String>,
}
