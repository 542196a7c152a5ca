use crate::models::{Classification, MatchScore, TolerancePolicy, VarianceResult};
use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use std::cmp::Ordering;

/// 置信度权重 (合计为 1)
pub const AMOUNT_WEIGHT: f64 = 0.5;
pub const QUANTITY_WEIGHT: f64 = 0.3;
pub const DATE_WEIGHT: f64 = 0.2;

/// 排序时日期差折算为比例的天数
const DATE_NORMALIZER_DAYS: i64 = 30;

/// 容差使用率 ≤ 10% 视为完全匹配
fn tight_usage() -> BigDecimal {
    BigDecimal::from(1) / BigDecimal::from(10)
}

/// 容差使用率 = |差异| / 容差；容差为 0 时只有零差异不占用
fn usage(abs_variance: &BigDecimal, tolerance: &BigDecimal) -> BigDecimal {
    if tolerance.is_zero() {
        if abs_variance.is_zero() {
            BigDecimal::zero()
        } else {
            BigDecimal::from(1)
        }
    } else {
        abs_variance / tolerance
    }
}

fn capped(u: &BigDecimal) -> f64 {
    u.to_f64().unwrap_or(1.0).min(1.0)
}

/// 差异评分
///
/// 容差边界为闭区间；置信度从 1.0 开始按权重扣减，结果限制在 [0, 1]。
pub fn score(variance: &VarianceResult, policy: &TolerancePolicy) -> MatchScore {
    let amount_abs = variance.amount_pct.abs();
    let quantity_abs = variance.quantity_pct.abs();
    let date_abs = BigDecimal::from(variance.date_variance.unsigned_abs());
    let date_tolerance = BigDecimal::from(policy.date_tolerance_days());

    let within_tolerance = amount_abs <= *policy.amount_tolerance_pct()
        && quantity_abs <= *policy.quantity_tolerance_pct()
        && date_abs <= date_tolerance;

    let amount_usage = usage(&amount_abs, policy.amount_tolerance_pct());
    let quantity_usage = usage(&quantity_abs, policy.quantity_tolerance_pct());
    let date_usage = usage(&date_abs, &date_tolerance);

    let confidence_score = (1.0
        - capped(&amount_usage) * AMOUNT_WEIGHT
        - capped(&quantity_usage) * QUANTITY_WEIGHT
        - capped(&date_usage) * DATE_WEIGHT)
        .clamp(0.0, 1.0);

    let tight = tight_usage();
    let classification = if !within_tolerance {
        Classification::Exception
    } else if [&amount_usage, &quantity_usage, &date_usage]
        .iter()
        .all(|u| **u <= tight)
    {
        Classification::Matched
    } else {
        Classification::Partial
    };

    MatchScore {
        within_tolerance,
        confidence_score,
        classification,
    }
}

/// 候选排序键：|金额比例| + |数量比例| + |日期差| / 30，越小越好
pub fn ranking_key(variance: &VarianceResult) -> BigDecimal {
    variance.amount_pct.abs()
        + variance.quantity_pct.abs()
        + BigDecimal::from(variance.date_variance.unsigned_abs()) / BigDecimal::from(DATE_NORMALIZER_DAYS)
}

/// 比较两个候选的排序键
pub fn compare_ranking(a: &VarianceResult, b: &VarianceResult) -> Ordering {
    ranking_key(a).cmp(&ranking_key(b))
}

fn percent(pct: &BigDecimal) -> String {
    format!("{}%", (pct * &BigDecimal::from(100)).with_scale(2))
}

/// 超出容差的维度说明；全部在容差内时为 None
pub fn exception_reason(variance: &VarianceResult, policy: &TolerancePolicy) -> Option<String> {
    let mut reasons = Vec::new();

    if variance.amount_pct.abs() > *policy.amount_tolerance_pct() {
        reasons.push(format!(
            "amount variance {} ({}) exceeds tolerance {}",
            variance.amount_variance,
            percent(&variance.amount_pct),
            percent(policy.amount_tolerance_pct())
        ));
    }
    if variance.quantity_pct.abs() > *policy.quantity_tolerance_pct() {
        reasons.push(format!(
            "quantity variance {} ({}) exceeds tolerance {}",
            variance.quantity_variance,
            percent(&variance.quantity_pct),
            percent(policy.quantity_tolerance_pct())
        ));
    }
    if variance.date_variance.unsigned_abs() > policy.date_tolerance_days().unsigned_abs() {
        reasons.push(format!(
            "date variance {} days exceeds tolerance {} days",
            variance.date_variance,
            policy.date_tolerance_days()
        ));
    }

    if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("; "))
    }
}
