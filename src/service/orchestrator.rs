use crate::db::{MatchFilter, MatchStore, ProcurementSource};
use crate::error::MatchError;
use crate::models::{
    Classification, DocumentKind, DocumentSnapshot, Evaluation, MatchEvent, MatchRecord, MatchRefs,
    MatchStatus, MatchType, Resolution, ToleranceOverride, TolerancePolicy,
};
use crate::service::events::EventSink;
use crate::service::{resolver, scorer, variance};
use chrono::{Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use futures::future::try_join_all;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

/// 单次匹配的纯计算：差异 → 评分 → 异常原因
pub fn evaluate(
    order: &DocumentSnapshot,
    receipt: Option<&DocumentSnapshot>,
    invoice: &DocumentSnapshot,
    policy: &TolerancePolicy,
) -> Result<Evaluation, MatchError> {
    let variance = variance::compute_variance(order, receipt, invoice)?;
    let score = scorer::score(&variance, policy);
    let exception_reason = match score.classification {
        Classification::Exception => scorer::exception_reason(&variance, policy),
        _ => None,
    };
    Ok(Evaluation {
        variance,
        score,
        exception_reason,
    })
}

/// 编排参数
#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// 候选订单日期相对发票日期的回溯天数
    pub lookback_days: i64,
    /// 批量匹配时同时处理的发票数
    pub batch_concurrency: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            lookback_days: 180,
            batch_concurrency: 8,
        }
    }
}

/// 回溯窗口上限 (天)
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

impl MatchOptions {
    pub fn validate(&self) -> Result<(), MatchError> {
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.lookback_days) {
            return Err(MatchError::InvalidPolicy(format!(
                "lookback_days must be within 0..={}, got {}",
                MAX_LOOKBACK_DAYS, self.lookback_days
            )));
        }
        if self.batch_concurrency == 0 {
            return Err(MatchError::InvalidPolicy(
                "batch_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// 候选订单最早的下单日期
    fn window_start(&self, invoice_date: NaiveDate) -> Result<NaiveDate, MatchError> {
        self.validate()?;
        let lookback = Duration::try_days(self.lookback_days).ok_or_else(|| {
            MatchError::InvalidPolicy(format!("lookback_days {} out of range", self.lookback_days))
        })?;
        Ok(invoice_date.checked_sub_signed(lookback).unwrap_or(NaiveDate::MIN))
    }
}

/// 人工指定单据的匹配请求
#[derive(Debug, Clone, Deserialize)]
pub struct ManualMatch {
    pub order_id: Uuid,
    #[serde(default)]
    pub receipt_id: Option<Uuid>,
    pub invoice_id: Uuid,
    pub match_type: MatchType,
    #[serde(default)]
    pub tolerance_override: Option<ToleranceOverride>,
    #[serde(default)]
    pub matched_by: Option<Uuid>,
}

/// 批量匹配中单张发票的结果
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub invoice_id: Uuid,
    pub match_id: Option<Uuid>,
    pub match_status: Option<MatchStatus>,
    pub error_code: Option<&'static str>,
    pub error: Option<String>,
}

/// 批量匹配汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub matched: usize,
    pub partial: usize,
    pub exceptions: usize,
    pub failed: usize,
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchSummary {
    fn push(&mut self, invoice_id: Uuid, result: Result<MatchRecord, MatchError>) {
        self.total += 1;
        let outcome = match result {
            Ok(record) => {
                match record.match_status {
                    MatchStatus::Matched => self.matched += 1,
                    MatchStatus::Partial => self.partial += 1,
                    _ => self.exceptions += 1,
                }
                BatchOutcome {
                    invoice_id,
                    match_id: Some(record.id),
                    match_status: Some(record.match_status),
                    error_code: None,
                    error: None,
                }
            }
            Err(e) => {
                self.failed += 1;
                BatchOutcome {
                    invoice_id,
                    match_id: None,
                    match_status: None,
                    error_code: Some(e.code()),
                    error: Some(e.to_string()),
                }
            }
        };
        self.outcomes.push(outcome);
    }
}

/// 一组可评估的候选单据
struct Candidate {
    order: DocumentSnapshot,
    receipt: Option<DocumentSnapshot>,
    evaluation: Evaluation,
}

impl Candidate {
    /// 排序键 → 订单日期 → 订单 id → 收货单 id
    fn rank(&self, other: &Self) -> Ordering {
        scorer::compare_ranking(&self.evaluation.variance, &other.evaluation.variance)
            .then_with(|| self.order.document_date.cmp(&other.order.document_date))
            .then_with(|| self.order.id.cmp(&other.order.id))
            .then_with(|| {
                let a = self.receipt.as_ref().map(|r| r.id);
                let b = other.receipt.as_ref().map(|r| r.id);
                a.cmp(&b)
            })
    }
}

/// 匹配编排服务
///
/// 负责组装候选、调用差异计算与评分、持久化匹配记录并发布事件。
/// 所有调用显式携带租户与容差策略，服务本身不持有可变状态。
pub struct MatchingOrchestrator {
    store: Arc<dyn MatchStore>,
    source: Arc<dyn ProcurementSource>,
    events: Arc<dyn EventSink>,
    options: MatchOptions,
}

impl MatchingOrchestrator {
    pub fn new(
        store: Arc<dyn MatchStore>,
        source: Arc<dyn ProcurementSource>,
        events: Arc<dyn EventSink>,
        options: MatchOptions,
    ) -> Self {
        Self {
            store,
            source,
            events,
            options,
        }
    }

    /// 为发票自动选择最佳订单 (及收货单) 并落库
    pub async fn match_candidates(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        policy: &TolerancePolicy,
    ) -> Result<MatchRecord, MatchError> {
        let invoice = self.load_open(tenant_id, DocumentKind::Invoice, invoice_id).await?;
        let since = self.options.window_start(invoice.document_date)?;

        let orders: Vec<DocumentSnapshot> = match invoice.order_ref {
            Some(order_ref) => self
                .source
                .document(tenant_id, DocumentKind::Order, order_ref)
                .await?
                .into_iter()
                .collect(),
            None => {
                self.source
                    .open_orders(tenant_id, invoice.counterparty_id, since)
                    .await?
            }
        };
        let orders: Vec<DocumentSnapshot> = orders
            .into_iter()
            .filter(|order| self.eligible(order, &invoice, since))
            .collect();
        tracing::debug!("发票 {} 候选订单 {} 张", invoice_id, orders.len());
        if orders.is_empty() {
            return Err(MatchError::NoCandidateFound(invoice_id));
        }

        // 有收货单的订单按三单匹配，否则两单匹配
        let receipts = try_join_all(
            orders
                .iter()
                .map(|order| self.source.receipts_for_order(tenant_id, order.id)),
        )
        .await?;
        let mut pairs: Vec<(DocumentSnapshot, Option<DocumentSnapshot>)> = Vec::new();
        for (order, order_receipts) in orders.into_iter().zip(receipts) {
            if order_receipts.is_empty() {
                pairs.push((order, None));
            } else {
                for receipt in order_receipts {
                    pairs.push((order.clone(), Some(receipt)));
                }
            }
        }

        // 评估是纯 CPU 计算，放到阻塞线程池里由 rayon 并行
        let evaluated = {
            let invoice = invoice.clone();
            let policy = policy.clone();
            tokio::task::spawn_blocking(move || evaluate_all(pairs, &invoice, &policy))
                .await
                .map_err(|e| MatchError::Internal(format!("candidate evaluation failed: {}", e)))?
        };

        let mut candidates = Vec::with_capacity(evaluated.len());
        let mut first_error = None;
        for result in evaluated {
            match result {
                Ok(candidate) => candidates.push(candidate),
                Err((order_id, e)) => {
                    tracing::warn!("候选订单 {} 无法评估 (invoice {}): {}", order_id, invoice_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        let Some(best) = candidates.into_iter().min_by(|a, b| a.rank(b)) else {
            return Err(first_error.unwrap_or(MatchError::NoCandidateFound(invoice_id)));
        };

        // 写入前重新读取，防止候选在评估期间被修改或关闭
        self.revalidate(tenant_id, &best.order).await?;
        if let Some(receipt) = &best.receipt {
            self.revalidate(tenant_id, receipt).await?;
        }
        self.revalidate(tenant_id, &invoice).await?;

        let refs = MatchRefs {
            order_id: best.order.id,
            receipt_id: best.receipt.as_ref().map(|r| r.id),
            invoice_id,
        };
        let now = Utc::now();
        let mut record = MatchRecord::pending(tenant_id, refs, policy.clone(), None, now);
        resolver::apply_evaluation(&mut record, &best.evaluation, now)?;

        self.store.insert_active(&record).await?;
        tracing::info!(
            "匹配记录 {} 已创建: invoice {} ↔ order {} ({}) status={} confidence={:.4}",
            record.id,
            invoice_id,
            record.order_id,
            record.match_type,
            record.match_status,
            record.confidence_score
        );
        self.publish(&record).await;
        Ok(record)
    }

    /// 按指定单据匹配；容差覆盖只对本次调用生效
    pub async fn manual_match(
        &self,
        tenant_id: Uuid,
        request: ManualMatch,
        policy: &TolerancePolicy,
    ) -> Result<MatchRecord, MatchError> {
        let policy = match &request.tolerance_override {
            Some(tolerance_override) => tolerance_override.apply_to(policy)?,
            None => policy.clone(),
        };

        match (request.match_type, request.receipt_id) {
            (MatchType::TwoWay, Some(_)) => {
                return Err(MatchError::InvalidRequest(
                    "two_way match must not reference a receipt".to_string(),
                ))
            }
            (MatchType::ThreeWay, None) => {
                return Err(MatchError::InvalidRequest(
                    "three_way match requires receipt_id".to_string(),
                ))
            }
            _ => {}
        }

        let order = self.load_open(tenant_id, DocumentKind::Order, request.order_id).await?;
        let invoice = self.load_open(tenant_id, DocumentKind::Invoice, request.invoice_id).await?;
        let receipt = match request.receipt_id {
            Some(id) => Some(self.load_open(tenant_id, DocumentKind::Receipt, id).await?),
            None => None,
        };
        check_references(&order, receipt.as_ref(), &invoice)?;

        let evaluation = evaluate(&order, receipt.as_ref(), &invoice, &policy)?;
        let refs = MatchRefs {
            order_id: order.id,
            receipt_id: request.receipt_id,
            invoice_id: invoice.id,
        };
        let now = Utc::now();
        let mut record = MatchRecord::pending(tenant_id, refs, policy, request.matched_by, now);
        resolver::apply_evaluation(&mut record, &evaluation, now)?;

        self.store.insert_active(&record).await?;
        tracing::info!(
            "人工匹配记录 {} 已创建 (by {:?}): invoice {} ↔ order {} status={}",
            record.id,
            record.matched_by,
            record.invoice_id,
            record.order_id,
            record.match_status
        );
        self.publish(&record).await;
        Ok(record)
    }

    /// 人工处理 exception / partial 记录
    pub async fn resolve(
        &self,
        tenant_id: Uuid,
        match_id: Uuid,
        resolution: Resolution,
        resolver_id: Uuid,
        note: &str,
    ) -> Result<MatchRecord, MatchError> {
        let current = self.get(tenant_id, match_id).await?;
        let updated = resolver::resolve(&current, resolution, resolver_id, note, Utc::now())?;

        if !self.store.update_if_status(&updated, current.match_status).await? {
            // 并发修改：以最新状态重新判断
            let latest = self.get(tenant_id, match_id).await?;
            tracing::warn!("匹配记录 {} 处理冲突, 当前状态 {}", match_id, latest.match_status);
            return Err(
                match resolver::resolve(&latest, resolution, resolver_id, note, Utc::now()) {
                    Err(e) => e,
                    Ok(_) => MatchError::InvalidTransition {
                        from: latest.match_status,
                        to: MatchStatus::Resolved,
                    },
                },
            );
        }

        tracing::info!(
            "匹配记录 {} 已处理: {} by {} (override_approved={})",
            match_id,
            resolution.as_str(),
            resolver_id,
            updated.override_approved
        );
        self.publish(&updated).await;
        Ok(updated)
    }

    /// 撤销匹配 (标记 superseded)，可重复调用
    pub async fn unmatch(&self, tenant_id: Uuid, match_id: Uuid) -> Result<(), MatchError> {
        let current = self.get(tenant_id, match_id).await?;
        resolver::check_unmatch(&current)?;
        if current.superseded {
            return Ok(());
        }

        self.store.mark_superseded(tenant_id, match_id).await?;
        tracing::info!(
            "匹配记录 {} 已撤销 (invoice {}, order {})",
            match_id,
            current.invoice_id,
            current.order_id
        );
        Ok(())
    }

    /// 数据更正后重跑同一组单据；新记录替代旧记录
    pub async fn rematch(&self, tenant_id: Uuid, match_id: Uuid) -> Result<MatchRecord, MatchError> {
        let old = self.get(tenant_id, match_id).await?;
        resolver::check_rematch(&old)?;

        let order = self.load_open(tenant_id, DocumentKind::Order, old.order_id).await?;
        let invoice = self.load_open(tenant_id, DocumentKind::Invoice, old.invoice_id).await?;
        let receipt = match old.receipt_id {
            Some(id) => Some(self.load_open(tenant_id, DocumentKind::Receipt, id).await?),
            None => None,
        };

        let evaluation = evaluate(&order, receipt.as_ref(), &invoice, &old.policy)?;
        let now = Utc::now();
        let mut record = MatchRecord::pending(tenant_id, old.refs(), old.policy.clone(), old.matched_by, now);
        record.supersedes = Some(old.id);
        resolver::apply_evaluation(&mut record, &evaluation, now)?;

        self.store.supersede_and_insert(tenant_id, old.id, &record).await?;
        tracing::info!(
            "匹配记录重跑: {} → {} status {} → {}",
            old.id,
            record.id,
            old.match_status,
            record.match_status
        );
        self.publish(&record).await;
        Ok(record)
    }

    pub async fn get(&self, tenant_id: Uuid, match_id: Uuid) -> Result<MatchRecord, MatchError> {
        self.store
            .get(tenant_id, match_id)
            .await?
            .ok_or(MatchError::MatchNotFound(match_id))
    }

    /// 待人工处理队列
    pub async fn pending(&self, tenant_id: Uuid) -> Result<Vec<MatchRecord>, MatchError> {
        self.store.list(tenant_id, &MatchFilter::pending_review()).await
    }

    pub async fn list(&self, tenant_id: Uuid, filter: &MatchFilter) -> Result<Vec<MatchRecord>, MatchError> {
        self.store.list(tenant_id, filter).await
    }

    /// 批量自动匹配；单张失败不影响其他发票
    pub async fn match_batch(
        &self,
        tenant_id: Uuid,
        invoice_ids: &[Uuid],
        policy: &TolerancePolicy,
    ) -> BatchSummary {
        let start = std::time::Instant::now();
        let concurrency = self.options.batch_concurrency.max(1);

        let mut results: Vec<(usize, Uuid, Result<MatchRecord, MatchError>)> =
            stream::iter(invoice_ids.iter().copied().enumerate())
                .map(|(idx, invoice_id)| async move {
                    let result = self.match_candidates(tenant_id, invoice_id, policy).await;
                    (idx, invoice_id, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;
        results.sort_by_key(|(idx, _, _)| *idx);

        let mut summary = BatchSummary::default();
        for (_, invoice_id, result) in results {
            if let Err(e) = &result {
                tracing::warn!("批量匹配 invoice {} 失败: {}", invoice_id, e);
            }
            summary.push(invoice_id, result);
        }
        tracing::info!(
            "批量匹配完成: {} 张发票, matched {}, partial {}, exception {}, failed {}, 耗时: {:?}",
            summary.total,
            summary.matched,
            summary.partial,
            summary.exceptions,
            summary.failed,
            start.elapsed()
        );
        summary
    }

    async fn load_open(
        &self,
        tenant_id: Uuid,
        kind: DocumentKind,
        id: Uuid,
    ) -> Result<DocumentSnapshot, MatchError> {
        let doc = self
            .source
            .document(tenant_id, kind, id)
            .await?
            .ok_or(MatchError::DocumentNotFound { kind, id })?;
        if !doc.is_open() {
            return Err(MatchError::DocumentNotOpen { kind, id });
        }
        Ok(doc)
    }

    /// 候选订单：未关闭、同供应商、同币种、日期在回溯窗口内且不晚于发票
    fn eligible(&self, order: &DocumentSnapshot, invoice: &DocumentSnapshot, since: NaiveDate) -> bool {
        if order.currency != invoice.currency {
            tracing::warn!(
                "订单 {} 币种 {} 与发票 {} 币种 {} 不一致, 跳过",
                order.id,
                order.currency,
                invoice.id,
                invoice.currency
            );
            return false;
        }
        order.is_open()
            && order.counterparty_id == invoice.counterparty_id
            && order.document_date >= since
            && order.document_date <= invoice.document_date
    }

    async fn revalidate(&self, tenant_id: Uuid, seen: &DocumentSnapshot) -> Result<(), MatchError> {
        let current = self.source.document(tenant_id, seen.kind, seen.id).await?;
        match current {
            Some(doc) if doc.is_open() && doc.revision == seen.revision => Ok(()),
            _ => {
                tracing::warn!("{} {} 在匹配期间已变更", seen.kind, seen.id);
                Err(MatchError::CandidateStale(seen.id))
            }
        }
    }

    /// 事件发布失败只记录日志
    async fn publish(&self, record: &MatchRecord) {
        let Some(event) = MatchEvent::from_record(record) else {
            return;
        };
        let name = event.event.name();
        if let Err(e) = self.events.emit(event).await {
            tracing::error!("事件 {} 发布失败 (match {}): {}", name, record.id, e);
        }
    }
}

fn evaluate_all(
    pairs: Vec<(DocumentSnapshot, Option<DocumentSnapshot>)>,
    invoice: &DocumentSnapshot,
    policy: &TolerancePolicy,
) -> Vec<Result<Candidate, (Uuid, MatchError)>> {
    pairs
        .into_par_iter()
        .map(|(order, receipt)| match evaluate(&order, receipt.as_ref(), invoice, policy) {
            Ok(evaluation) => Ok(Candidate {
                order,
                receipt,
                evaluation,
            }),
            Err(e) => Err((order.id, e)),
        })
        .collect()
}

/// 人工指定的单据之间必须互相一致
fn check_references(
    order: &DocumentSnapshot,
    receipt: Option<&DocumentSnapshot>,
    invoice: &DocumentSnapshot,
) -> Result<(), MatchError> {
    if order.counterparty_id != invoice.counterparty_id {
        return Err(MatchError::InvalidRequest(format!(
            "order {} and invoice {} belong to different counterparties",
            order.id, invoice.id
        )));
    }
    if let Some(order_ref) = invoice.order_ref {
        if order_ref != order.id {
            return Err(MatchError::InvalidRequest(format!(
                "invoice {} references order {}, not {}",
                invoice.id, order_ref, order.id
            )));
        }
    }
    if let Some(receipt) = receipt {
        if receipt.order_ref != Some(order.id) {
            return Err(MatchError::InvalidRequest(format!(
                "receipt {} does not belong to order {}",
                receipt.id, order.id
            )));
        }
    }
    Ok(())
}
