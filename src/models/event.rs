use crate::models::{MatchRecord, MatchStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 发往通知/工作流服务的事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "transaction.matched")]
    Matched,
    #[serde(rename = "transaction.partial")]
    Partial,
    #[serde(rename = "transaction.exception_raised")]
    ExceptionRaised,
    #[serde(rename = "transaction.resolved")]
    Resolved,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Matched => "transaction.matched",
            Self::Partial => "transaction.partial",
            Self::ExceptionRaised => "transaction.exception_raised",
            Self::Resolved => "transaction.resolved",
        }
    }

    /// pending 不对外发布
    pub fn for_status(status: MatchStatus) -> Option<Self> {
        match status {
            MatchStatus::Pending => None,
            MatchStatus::Matched => Some(Self::Matched),
            MatchStatus::Partial => Some(Self::Partial),
            MatchStatus::Exception => Some(Self::ExceptionRaised),
            MatchStatus::Resolved => Some(Self::Resolved),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub event: EventKind,
    pub match_id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub invoice_id: Uuid,
    pub match_status: MatchStatus,
    pub confidence_score: f64,
    pub occurred_at: DateTime<Utc>,
}

impl MatchEvent {
    pub fn from_record(record: &MatchRecord) -> Option<Self> {
        let event = EventKind::for_status(record.match_status)?;
        Some(Self {
            event,
            match_id: record.id,
            tenant_id: record.tenant_id,
            order_id: record.order_id,
            invoice_id: record.invoice_id,
            match_status: record.match_status,
            confidence_score: record.confidence_score,
            occurred_at: record.updated_at,
        })
    }
}
