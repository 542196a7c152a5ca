use crate::models::{DocumentKind, MatchStatus};
use thiserror::Error;
use uuid::Uuid;

/// 错误分类，调用方据此决定是否重试
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 校验失败，持久化之前拒绝，不重试
    Validation,
    /// 并发冲突，调用方重新读取后自行决定是否重试
    Concurrency,
    /// 业务终止 (找不到候选、已解决不可撤销等)
    Business,
    /// 存储或基础设施故障
    Infrastructure,
}

/// 匹配引擎错误
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: MatchStatus, to: MatchStatus },

    #[error("match {0} has been superseded")]
    MatchSuperseded(Uuid),

    #[error("invalid tolerance policy: {0}")]
    InvalidPolicy(String),

    #[error("document {document_id} is missing required field `{field}`")]
    MissingField { document_id: Uuid, field: &'static str },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("currency mismatch: order is {order}, invoice is {invoice}")]
    CurrencyMismatch { order: String, invoice: String },

    #[error("an active match already exists for order {order_id} and invoice {invoice_id}")]
    ConcurrentMatchExists { order_id: Uuid, invoice_id: Uuid },

    #[error("candidate document {0} changed since it was read")]
    CandidateStale(Uuid),

    #[error("no candidate order found for invoice {0}")]
    NoCandidateFound(Uuid),

    #[error("match {0} is resolved and cannot be unmatched")]
    CannotUnmatchResolved(Uuid),

    #[error("{kind} {id} not found")]
    DocumentNotFound { kind: DocumentKind, id: Uuid },

    #[error("{kind} {id} is not open for matching")]
    DocumentNotOpen { kind: DocumentKind, id: Uuid },

    #[error("match {0} not found")]
    MatchNotFound(Uuid),

    #[error("division by zero base")]
    DivisionUndefined,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store operation `{0}` timed out")]
    Timeout(&'static str),

    #[error("unreadable stored value: {0}")]
    Corrupt(String),

    #[error("internal task failed: {0}")]
    Internal(String),
}

impl MatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTransition { .. }
            | Self::MatchSuperseded(_)
            | Self::InvalidPolicy(_)
            | Self::MissingField { .. }
            | Self::InvalidRequest(_)
            | Self::CurrencyMismatch { .. }
            | Self::DivisionUndefined => ErrorKind::Validation,
            Self::ConcurrentMatchExists { .. } | Self::CandidateStale(_) => ErrorKind::Concurrency,
            Self::NoCandidateFound(_)
            | Self::CannotUnmatchResolved(_)
            | Self::DocumentNotFound { .. }
            | Self::DocumentNotOpen { .. }
            | Self::MatchNotFound(_) => ErrorKind::Business,
            Self::Database(_) | Self::Timeout(_) | Self::Corrupt(_) | Self::Internal(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// 稳定的错误码，用于 API 响应体
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::MatchSuperseded(_) => "match_superseded",
            Self::InvalidPolicy(_) => "invalid_policy",
            Self::MissingField { .. } => "missing_field",
            Self::InvalidRequest(_) => "invalid_request",
            Self::CurrencyMismatch { .. } => "currency_mismatch",
            Self::ConcurrentMatchExists { .. } => "concurrent_match_exists",
            Self::CandidateStale(_) => "candidate_stale",
            Self::NoCandidateFound(_) => "no_candidate_found",
            Self::CannotUnmatchResolved(_) => "cannot_unmatch_resolved",
            Self::DocumentNotFound { .. } => "document_not_found",
            Self::DocumentNotOpen { .. } => "document_not_open",
            Self::MatchNotFound(_) => "match_not_found",
            Self::DivisionUndefined => "division_undefined",
            Self::Database(_) => "database_error",
            Self::Timeout(_) => "timeout",
            Self::Corrupt(_) => "corrupt_record",
            Self::Internal(_) => "internal_error",
        }
    }
}
