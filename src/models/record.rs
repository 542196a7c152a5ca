use crate::error::MatchError;
use crate::models::TolerancePolicy;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 两单匹配 (订单-发票) 或三单匹配 (订单-收货-发票)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    TwoWay,
    ThreeWay,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TwoWay => "two_way",
            Self::ThreeWay => "three_way",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchType {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "two_way" => Ok(Self::TwoWay),
            "three_way" => Ok(Self::ThreeWay),
            other => Err(MatchError::Corrupt(format!("unknown match_type `{}`", other))),
        }
    }
}

/// 匹配状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Matched,
    Partial,
    Exception,
    Resolved,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 5] = [
        Self::Pending,
        Self::Matched,
        Self::Partial,
        Self::Exception,
        Self::Resolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matched => "matched",
            Self::Partial => "partial",
            Self::Exception => "exception",
            Self::Resolved => "resolved",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// 待人工处理的状态
    pub fn needs_review(&self) -> bool {
        matches!(self, Self::Exception | Self::Partial)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| MatchError::Corrupt(format!("unknown match_status `{}`", s)))
    }
}

/// 人工处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    AcceptVariance,
    RejectInvoice,
    RequestCorrection,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [
        Self::AcceptVariance,
        Self::RejectInvoice,
        Self::RequestCorrection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcceptVariance => "accept_variance",
            Self::RejectInvoice => "reject_invoice",
            Self::RequestCorrection => "request_correction",
        }
    }
}

impl FromStr for Resolution {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| MatchError::Corrupt(format!("unknown resolution `{}`", s)))
    }
}

/// 匹配记录 (审计主体，永不物理删除)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub receipt_id: Option<Uuid>,
    pub invoice_id: Uuid,
    pub match_type: MatchType,
    pub match_status: MatchStatus,
    pub confidence_score: f64,

    // 差异明细
    pub amount_variance: BigDecimal,
    pub amount_variance_pct: BigDecimal,
    pub quantity_variance: BigDecimal,
    pub quantity_variance_pct: BigDecimal,
    pub date_variance: i64,
    pub within_tolerance: bool,
    pub exception_reason: Option<String>,

    /// 本次实际使用的容差 (含单次覆盖)
    pub policy: TolerancePolicy,

    // 人工处理
    pub resolution: Option<Resolution>,
    pub resolution_note: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub override_approved: bool,

    // 替代关系
    pub superseded: bool,
    pub supersedes: Option<Uuid>,

    pub matched_at: Option<DateTime<Utc>>,
    /// None 表示系统自动匹配
    pub matched_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建记录需要的引用信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRefs {
    pub order_id: Uuid,
    pub receipt_id: Option<Uuid>,
    pub invoice_id: Uuid,
}

impl MatchRefs {
    pub fn match_type(&self) -> MatchType {
        if self.receipt_id.is_some() {
            MatchType::ThreeWay
        } else {
            MatchType::TwoWay
        }
    }
}

impl MatchRecord {
    /// 创建 pending 记录，由评分结果推进到最终状态
    pub fn pending(
        tenant_id: Uuid,
        refs: MatchRefs,
        policy: TolerancePolicy,
        matched_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            order_id: refs.order_id,
            receipt_id: refs.receipt_id,
            invoice_id: refs.invoice_id,
            match_type: refs.match_type(),
            match_status: MatchStatus::Pending,
            confidence_score: 0.0,
            amount_variance: BigDecimal::from(0),
            amount_variance_pct: BigDecimal::from(0),
            quantity_variance: BigDecimal::from(0),
            quantity_variance_pct: BigDecimal::from(0),
            date_variance: 0,
            within_tolerance: false,
            exception_reason: None,
            policy,
            resolution: None,
            resolution_note: None,
            resolved_by: None,
            resolved_at: None,
            override_approved: false,
            superseded: false,
            supersedes: None,
            matched_at: None,
            matched_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn refs(&self) -> MatchRefs {
        MatchRefs {
            order_id: self.order_id,
            receipt_id: self.receipt_id,
            invoice_id: self.invoice_id,
        }
    }

    /// 活动记录：未被替代且未终结
    pub fn is_active(&self) -> bool {
        !self.superseded && !self.match_status.is_terminal()
    }
}
