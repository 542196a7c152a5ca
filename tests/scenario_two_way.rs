mod common;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{day, dec, policy, Harness};
use std::sync::Arc;
use txn_match_rust::db::{MemoryProcurementSource, ProcurementSource};
use txn_match_rust::models::{
    DocumentKind, DocumentSnapshot, DocumentStatus, EventKind, MatchStatus, MatchType, ToleranceOverride,
};
use txn_match_rust::service::ManualMatch;
use txn_match_rust::MatchError;
use uuid::Uuid;

#[tokio::test]
async fn two_percent_over_is_partial() {
    let h = Harness::new();
    let mut events = h.events.subscribe();
    let order = h.order("10000", day(3, 1), &[]);
    let invoice = h.invoice("10200", day(3, 1), &[]);

    let record = h
        .orchestrator
        .match_candidates(h.tenant, invoice.id, &policy("0.03", "0.05", 5))
        .await
        .unwrap();

    assert_eq!(record.order_id, order.id);
    assert_eq!(record.match_type, MatchType::TwoWay);
    assert_eq!(record.match_status, MatchStatus::Partial);
    assert!(record.within_tolerance);
    assert_eq!(record.amount_variance, dec("200"));
    assert_eq!(record.amount_variance_pct, dec("0.02"));
    assert!((record.confidence_score - (1.0 - 0.5 * 2.0 / 3.0)).abs() < 1e-9);
    assert!(record.exception_reason.is_none());
    assert!(record.matched_at.is_some());
    assert!(record.matched_by.is_none());

    let event = events.recv().await.unwrap();
    assert_eq!(event.event, EventKind::Partial);
    assert_eq!(event.match_id, record.id);
}

#[tokio::test]
async fn ten_percent_over_is_exception() {
    let h = Harness::new();
    let mut events = h.events.subscribe();
    h.order("10000", day(3, 1), &[]);
    let invoice = h.invoice("11000", day(3, 1), &[]);

    let record = h
        .orchestrator
        .match_candidates(h.tenant, invoice.id, &policy("0.03", "0.05", 5))
        .await
        .unwrap();

    assert_eq!(record.match_status, MatchStatus::Exception);
    assert!(!record.within_tolerance);
    assert_eq!(record.amount_variance_pct, dec("0.1"));
    assert!(record.exception_reason.as_deref().unwrap().contains("amount variance"));
    assert!(record.matched_at.is_none());
    assert_eq!(events.recv().await.unwrap().event, EventKind::ExceptionRaised);
}

#[tokio::test]
async fn exact_invoice_is_matched() {
    let h = Harness::new();
    h.order("500.00", day(3, 1), &[("SKU-1", "50", Some("10"))]);
    let invoice = h.invoice("500", day(3, 3), &[("SKU-1", "50", Some("10"))]);

    let record = h
        .orchestrator
        .match_candidates(h.tenant, invoice.id, &policy("0.03", "0.05", 30))
        .await
        .unwrap();

    assert_eq!(record.match_status, MatchStatus::Matched);
    assert_eq!(record.date_variance, 2);
    assert!(record.confidence_score > 0.98);
}

#[tokio::test]
async fn closest_order_wins() {
    let h = Harness::new();
    h.order("10000", day(3, 1), &[]);
    let close = h.order("10150", day(3, 2), &[]);
    h.order("12000", day(3, 3), &[]);
    let invoice = h.invoice("10200", day(3, 3), &[]);

    let record = h
        .orchestrator
        .match_candidates(h.tenant, invoice.id, &policy("0.03", "0.05", 5))
        .await
        .unwrap();
    assert_eq!(record.order_id, close.id);
}

#[tokio::test]
async fn equal_rank_prefers_earliest_order() {
    let h = Harness::new();
    // 同金额、同日期差 (预计交货日与发票日差值相同)
    let mut late = h.order("1000", day(3, 10), &[]);
    late.expected_date = Some(day(3, 12));
    h.source.upsert(late.clone());
    let mut early = h.order("1000", day(3, 5), &[]);
    early.expected_date = Some(day(3, 12));
    h.source.upsert(early.clone());
    let invoice = h.invoice("1000", day(3, 12), &[]);

    let record = h
        .orchestrator
        .match_candidates(h.tenant, invoice.id, &policy("0.03", "0.05", 5))
        .await
        .unwrap();
    assert_eq!(record.order_id, early.id);
}

#[tokio::test]
async fn candidates_are_filtered() {
    let h = Harness::new();
    let invoice = h.invoice("1000", day(9, 1), &[]);

    // 超出回溯窗口
    h.order("1000", NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(), &[]);
    // 其他供应商
    let mut other_vendor = h.order("1000", day(8, 1), &[]);
    other_vendor.counterparty_id = Uuid::new_v4();
    h.source.upsert(other_vendor);
    // 币种不同
    let mut euro = h.order("1000", day(8, 1), &[]);
    euro.currency = "EUR".to_string();
    h.source.upsert(euro);
    // 已关闭
    let closed = h.order("1000", day(8, 1), &[]);
    h.source.set_status(closed.id, DocumentStatus::Closed);
    // 晚于发票
    h.order("1000", day(9, 2), &[]);

    let err = h
        .orchestrator
        .match_candidates(h.tenant, invoice.id, &policy("0.03", "0.05", 5))
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::NoCandidateFound(id) if id == invoice.id));
    assert!(h.store.is_empty());

    let inside = h.order("1000", day(3, 6), &[]);
    let record = h
        .orchestrator
        .match_candidates(h.tenant, invoice.id, &policy("0.03", "0.05", 365))
        .await
        .unwrap();
    assert_eq!(record.order_id, inside.id);
}

#[tokio::test]
async fn order_reference_restricts_candidates() {
    let h = Harness::new();
    let better = h.order("1000", day(3, 1), &[]);
    let referenced = h.order("1100", day(3, 1), &[]);
    let mut invoice = h.invoice("1000", day(3, 1), &[]);
    invoice.order_ref = Some(referenced.id);
    h.source.upsert(invoice.clone());

    let record = h
        .orchestrator
        .match_candidates(h.tenant, invoice.id, &policy("0.03", "0.05", 5))
        .await
        .unwrap();
    assert_eq!(record.order_id, referenced.id);
    assert_ne!(record.order_id, better.id);
    assert_eq!(record.match_status, MatchStatus::Exception);
}

#[tokio::test]
async fn other_tenant_documents_are_invisible() {
    let h = Harness::new();
    h.order("1000", day(3, 1), &[]);
    let invoice = h.invoice("1000", day(3, 1), &[]);

    let err = h
        .orchestrator
        .match_candidates(Uuid::new_v4(), invoice.id, &policy("0.03", "0.05", 5))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MatchError::DocumentNotFound { kind: DocumentKind::Invoice, .. }
    ));
}

#[tokio::test]
async fn unevaluable_candidates_surface_their_error() {
    let h = Harness::new();
    // 两单匹配缺少预计交货日期
    let mut order = h.order("1000", day(3, 1), &[]);
    order.expected_date = None;
    h.source.upsert(order);
    let invoice = h.invoice("1000", day(3, 1), &[]);

    let err = h
        .orchestrator
        .match_candidates(h.tenant, invoice.id, &policy("0.03", "0.05", 5))
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::MissingField { field: "expected_date", .. }));
}

#[tokio::test]
async fn override_applies_to_one_call_only() {
    let h = Harness::new();
    let order = h.order("10000", day(3, 1), &[]);
    let invoice = h.invoice("11000", day(3, 1), &[]);
    let tenant_policy = policy("0.03", "0.05", 5);

    let request = ManualMatch {
        order_id: order.id,
        receipt_id: None,
        invoice_id: invoice.id,
        match_type: MatchType::TwoWay,
        tolerance_override: Some(ToleranceOverride {
            amount_tolerance_pct: Some(dec("0.15")),
            ..Default::default()
        }),
        matched_by: Some(Uuid::new_v4()),
    };
    let record = h
        .orchestrator
        .manual_match(h.tenant, request, &tenant_policy)
        .await
        .unwrap();

    assert_eq!(record.match_status, MatchStatus::Partial);
    assert_eq!(record.policy.amount_tolerance_pct(), &dec("0.15"));
    assert_eq!(record.policy.quantity_tolerance_pct(), &dec("0.05"));
    assert_eq!(tenant_policy.amount_tolerance_pct(), &dec("0.03"));
    assert!(record.matched_by.is_some());
}

#[tokio::test]
async fn manual_match_validates_inputs() {
    let h = Harness::new();
    let order = h.order("1000", day(3, 1), &[]);
    let invoice = h.invoice("1000", day(3, 1), &[]);
    let p = policy("0.03", "0.05", 5);
    let base = ManualMatch {
        order_id: order.id,
        receipt_id: None,
        invoice_id: invoice.id,
        match_type: MatchType::ThreeWay,
        tolerance_override: None,
        matched_by: None,
    };

    let err = h.orchestrator.manual_match(h.tenant, base.clone(), &p).await.unwrap_err();
    assert!(matches!(err, MatchError::InvalidRequest(_)));

    let negative = ManualMatch {
        match_type: MatchType::TwoWay,
        tolerance_override: Some(ToleranceOverride {
            date_tolerance_days: Some(-1),
            ..Default::default()
        }),
        ..base.clone()
    };
    let err = h.orchestrator.manual_match(h.tenant, negative, &p).await.unwrap_err();
    assert!(matches!(err, MatchError::InvalidPolicy(_)));

    let missing = ManualMatch {
        match_type: MatchType::TwoWay,
        invoice_id: Uuid::new_v4(),
        ..base.clone()
    };
    let err = h.orchestrator.manual_match(h.tenant, missing, &p).await.unwrap_err();
    assert!(matches!(err, MatchError::DocumentNotFound { kind: DocumentKind::Invoice, .. }));

    h.source.set_status(order.id, DocumentStatus::Cancelled);
    let closed = ManualMatch {
        match_type: MatchType::TwoWay,
        ..base
    };
    let err = h.orchestrator.manual_match(h.tenant, closed, &p).await.unwrap_err();
    assert!(matches!(err, MatchError::DocumentNotOpen { kind: DocumentKind::Order, .. }));
    assert!(h.store.is_empty());
}

/// 返回候选后立即修改单据，模拟评估期间的并发变更
struct ChangesAfterRead {
    inner: Arc<MemoryProcurementSource>,
    close: bool,
}

#[async_trait]
impl ProcurementSource for ChangesAfterRead {
    async fn document(
        &self,
        tenant_id: Uuid,
        kind: DocumentKind,
        id: Uuid,
    ) -> Result<Option<DocumentSnapshot>, MatchError> {
        self.inner.document(tenant_id, kind, id).await
    }

    async fn open_orders(
        &self,
        tenant_id: Uuid,
        counterparty_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<DocumentSnapshot>, MatchError> {
        let orders = self.inner.open_orders(tenant_id, counterparty_id, since).await?;
        for order in &orders {
            if self.close {
                self.inner.set_status(order.id, DocumentStatus::Closed);
            } else {
                self.inner.modify(order.id, |doc| doc.total_amount = dec("999"));
            }
        }
        Ok(orders)
    }

    async fn receipts_for_order(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> Result<Vec<DocumentSnapshot>, MatchError> {
        self.inner.receipts_for_order(tenant_id, order_id).await
    }
}

#[tokio::test]
async fn changed_candidate_is_stale() {
    for close in [false, true] {
        let source = Arc::new(MemoryProcurementSource::new());
        let h = Harness::with_wrapped_source(source, |inner| {
            Arc::new(ChangesAfterRead { inner, close }) as Arc<dyn ProcurementSource>
        });
        let order = h.order("1000", day(3, 1), &[]);
        let invoice = h.invoice("1000", day(3, 1), &[]);

        let err = h
            .orchestrator
            .match_candidates(h.tenant, invoice.id, &policy("0.03", "0.05", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::CandidateStale(id) if id == order.id));
        assert!(h.store.is_empty());
    }
}
