use crate::error::MatchError;
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 容差策略 (租户级)
///
/// 所有容差均为非负数；0 表示必须完全一致。
/// 只能通过 [`TolerancePolicy::new`] 或反序列化构造，两者都会校验。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PolicyInput")]
pub struct TolerancePolicy {
    amount_tolerance_pct: BigDecimal,
    quantity_tolerance_pct: BigDecimal,
    date_tolerance_days: i64,
}

#[derive(Deserialize)]
struct PolicyInput {
    amount_tolerance_pct: BigDecimal,
    quantity_tolerance_pct: BigDecimal,
    date_tolerance_days: i64,
}

impl TryFrom<PolicyInput> for TolerancePolicy {
    type Error = MatchError;

    fn try_from(input: PolicyInput) -> Result<Self, Self::Error> {
        Self::new(
            input.amount_tolerance_pct,
            input.quantity_tolerance_pct,
            input.date_tolerance_days,
        )
    }
}

impl TolerancePolicy {
    pub fn new(
        amount_tolerance_pct: BigDecimal,
        quantity_tolerance_pct: BigDecimal,
        date_tolerance_days: i64,
    ) -> Result<Self, MatchError> {
        if amount_tolerance_pct < BigDecimal::zero() {
            return Err(MatchError::InvalidPolicy(format!(
                "amount_tolerance_pct must be non-negative, got {}",
                amount_tolerance_pct
            )));
        }
        if quantity_tolerance_pct < BigDecimal::zero() {
            return Err(MatchError::InvalidPolicy(format!(
                "quantity_tolerance_pct must be non-negative, got {}",
                quantity_tolerance_pct
            )));
        }
        if date_tolerance_days < 0 {
            return Err(MatchError::InvalidPolicy(format!(
                "date_tolerance_days must be non-negative, got {}",
                date_tolerance_days
            )));
        }
        Ok(Self {
            amount_tolerance_pct,
            quantity_tolerance_pct,
            date_tolerance_days,
        })
    }

    pub fn amount_tolerance_pct(&self) -> &BigDecimal {
        &self.amount_tolerance_pct
    }

    pub fn quantity_tolerance_pct(&self) -> &BigDecimal {
        &self.quantity_tolerance_pct
    }

    pub fn date_tolerance_days(&self) -> i64 {
        self.date_tolerance_days
    }
}

/// 单次调用的容差覆盖，不回写租户策略
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToleranceOverride {
    #[serde(default)]
    pub amount_tolerance_pct: Option<BigDecimal>,
    #[serde(default)]
    pub quantity_tolerance_pct: Option<BigDecimal>,
    #[serde(default)]
    pub date_tolerance_days: Option<i64>,
}

impl ToleranceOverride {
    /// 在租户策略上叠加覆盖值，结果同样经过校验
    pub fn apply_to(&self, base: &TolerancePolicy) -> Result<TolerancePolicy, MatchError> {
        TolerancePolicy::new(
            self.amount_tolerance_pct
                .clone()
                .unwrap_or_else(|| base.amount_tolerance_pct.clone()),
            self.quantity_tolerance_pct
                .clone()
                .unwrap_or_else(|| base.quantity_tolerance_pct.clone()),
            self.date_tolerance_days.unwrap_or(base.date_tolerance_days),
        )
    }
}

/// 租户 -> 容差策略，未配置的租户使用默认策略
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    default: TolerancePolicy,
    tenants: HashMap<Uuid, TolerancePolicy>,
}

impl PolicyRegistry {
    pub fn new(default: TolerancePolicy) -> Self {
        Self {
            default,
            tenants: HashMap::new(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: Uuid, policy: TolerancePolicy) -> Self {
        self.tenants.insert(tenant_id, policy);
        self
    }

    pub fn for_tenant(&self, tenant_id: Uuid) -> &TolerancePolicy {
        self.tenants.get(&tenant_id).unwrap_or(&self.default)
    }
}
