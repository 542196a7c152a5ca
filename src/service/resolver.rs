use crate::error::MatchError;
use crate::models::{Evaluation, MatchRecord, MatchStatus, Resolution};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 状态机合法迁移
///
/// ```text
/// pending ──自动──► matched | partial | exception
/// partial | exception ──人工──► resolved (终态)
/// ```
///
/// 其余迁移 (包括 exception → exception) 一律拒绝；
/// 数据更正后的重跑必须新建记录并将旧记录标记为 superseded。
pub fn can_transition(from: MatchStatus, to: MatchStatus) -> bool {
    use MatchStatus::*;
    matches!(
        (from, to),
        (Pending, Matched) | (Pending, Partial) | (Pending, Exception) | (Partial, Resolved) | (Exception, Resolved)
    )
}

/// 持久化比例保留的小数位 (评分始终使用全精度)
const PCT_SCALE: i64 = 6;

fn transition(record: &mut MatchRecord, to: MatchStatus) -> Result<(), MatchError> {
    if !can_transition(record.match_status, to) {
        return Err(MatchError::InvalidTransition {
            from: record.match_status,
            to,
        });
    }
    record.match_status = to;
    Ok(())
}

/// 将评分结果写入 pending 记录，推进到评分给出的状态
pub fn apply_evaluation(
    record: &mut MatchRecord,
    evaluation: &Evaluation,
    now: DateTime<Utc>,
) -> Result<(), MatchError> {
    transition(record, evaluation.score.classification.into())?;

    let variance = &evaluation.variance;
    record.amount_variance = variance.amount_variance.clone();
    record.amount_variance_pct = variance.amount_pct.with_scale(PCT_SCALE);
    record.quantity_variance = variance.quantity_variance.clone();
    record.quantity_variance_pct = variance.quantity_pct.with_scale(PCT_SCALE);
    record.date_variance = variance.date_variance;
    record.within_tolerance = evaluation.score.within_tolerance;
    record.confidence_score = evaluation.score.confidence_score;
    record.exception_reason = if record.match_status == MatchStatus::Exception {
        evaluation.exception_reason.clone()
    } else {
        None
    };
    if record.match_status != MatchStatus::Exception {
        record.matched_at = Some(now);
    }
    record.updated_at = now;
    Ok(())
}

/// 人工处理异常或部分匹配，返回更新后的副本
///
/// 只允许从 exception / partial 出发；accept_variance 额外设置 override_approved，
/// 供下游付款审批读取。原异常原因并入处理备注保留审计信息。
pub fn resolve(
    record: &MatchRecord,
    resolution: Resolution,
    resolver_id: Uuid,
    note: &str,
    now: DateTime<Utc>,
) -> Result<MatchRecord, MatchError> {
    if record.superseded {
        return Err(MatchError::MatchSuperseded(record.id));
    }

    let mut updated = record.clone();
    transition(&mut updated, MatchStatus::Resolved)?;

    let note = note.trim();
    updated.resolution_note = Some(match record.exception_reason.as_deref() {
        Some(reason) => format!("{} | Resolved: {}", reason, note),
        None => format!("Resolved: {}", note),
    });
    updated.exception_reason = None;
    updated.resolution = Some(resolution);
    updated.override_approved = resolution == Resolution::AcceptVariance;
    updated.resolved_by = Some(resolver_id);
    updated.resolved_at = Some(now);
    updated.updated_at = now;
    Ok(updated)
}

/// 撤销匹配前的检查：已解决的记录不可撤销
pub fn check_unmatch(record: &MatchRecord) -> Result<(), MatchError> {
    if record.match_status == MatchStatus::Resolved {
        return Err(MatchError::CannotUnmatchResolved(record.id));
    }
    Ok(())
}

/// 重跑前的检查：旧记录必须仍是活动记录
pub fn check_rematch(record: &MatchRecord) -> Result<(), MatchError> {
    if record.superseded {
        return Err(MatchError::MatchSuperseded(record.id));
    }
    if record.match_status.is_terminal() {
        return Err(MatchError::InvalidTransition {
            from: record.match_status,
            to: MatchStatus::Pending,
        });
    }
    Ok(())
}
