#![allow(dead_code)]

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use indexmap::IndexMap;
use std::str::FromStr;
use std::sync::Arc;
use txn_match_rust::api::{self, AppState};
use txn_match_rust::db::{MemoryMatchStore, MemoryProcurementSource, ProcurementSource};
use txn_match_rust::models::{
    DocumentKind, DocumentLine, DocumentSnapshot, DocumentStatus, PolicyRegistry, TolerancePolicy,
};
use txn_match_rust::service::BroadcastEventSink;
use txn_match_rust::{MatchOptions, MatchingOrchestrator};
use uuid::Uuid;

pub fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

pub fn day(month: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, month, d).unwrap()
}

pub fn policy(amount: &str, quantity: &str, days: i64) -> TolerancePolicy {
    TolerancePolicy::new(dec(amount), dec(quantity), days).unwrap()
}

/// 内存存储 + 广播事件的测试环境
pub struct Harness {
    pub tenant: Uuid,
    pub vendor: Uuid,
    pub store: Arc<MemoryMatchStore>,
    pub source: Arc<MemoryProcurementSource>,
    pub events: Arc<BroadcastEventSink>,
    pub orchestrator: Arc<MatchingOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_source(Arc::new(MemoryProcurementSource::new()))
    }

    pub fn with_source(source: Arc<MemoryProcurementSource>) -> Self {
        let store = Arc::new(MemoryMatchStore::new());
        let events = Arc::new(BroadcastEventSink::new(64));
        let orchestrator = Arc::new(MatchingOrchestrator::new(
            store.clone(),
            source.clone(),
            events.clone(),
            MatchOptions::default(),
        ));
        Self {
            tenant: Uuid::new_v4(),
            vendor: Uuid::new_v4(),
            store,
            source,
            events,
            orchestrator,
        }
    }

    /// 使用自定义单据来源 (例如模拟并发修改)
    pub fn with_wrapped_source<S>(source: Arc<MemoryProcurementSource>, wrap: S) -> Self
    where
        S: FnOnce(Arc<MemoryProcurementSource>) -> Arc<dyn ProcurementSource>,
    {
        let mut harness = Self::with_source(source.clone());
        harness.orchestrator = Arc::new(MatchingOrchestrator::new(
            harness.store.clone(),
            wrap(source),
            harness.events.clone(),
            MatchOptions::default(),
        ));
        harness
    }

    pub fn state(&self, default_policy: TolerancePolicy) -> AppState {
        AppState {
            orchestrator: self.orchestrator.clone(),
            policies: Arc::new(PolicyRegistry::new(default_policy)),
        }
    }

    pub fn router(&self, default_policy: TolerancePolicy) -> axum::Router {
        api::router(self.state(default_policy))
    }

    fn snapshot(
        &self,
        kind: DocumentKind,
        total: &str,
        date: NaiveDate,
        lines: &[(&str, &str, Option<&str>)],
    ) -> DocumentSnapshot {
        let lines: IndexMap<String, DocumentLine> = lines
            .iter()
            .map(|(key, qty, price)| (key.to_string(), DocumentLine::new(dec(qty), price.map(dec))))
            .collect();
        DocumentSnapshot {
            id: Uuid::new_v4(),
            tenant_id: self.tenant,
            kind,
            counterparty_id: self.vendor,
            order_ref: None,
            total_amount: dec(total),
            currency: "USD".to_string(),
            document_date: date,
            expected_date: None,
            status: DocumentStatus::Open,
            revision: 1,
            lines,
        }
    }

    /// 采购订单，预计交货日期与下单日期相同
    pub fn order(&self, total: &str, date: NaiveDate, lines: &[(&str, &str, Option<&str>)]) -> DocumentSnapshot {
        let mut doc = self.snapshot(DocumentKind::Order, total, date, lines);
        doc.expected_date = Some(date);
        self.source.upsert(doc.clone());
        doc
    }

    /// 收货单；lines 为 (行, 验收数量)
    pub fn receipt(&self, order: &DocumentSnapshot, date: NaiveDate, lines: &[(&str, &str)]) -> DocumentSnapshot {
        let priced: Vec<(&str, &str, Option<&str>)> = lines.iter().map(|(k, q)| (*k, *q, None)).collect();
        let mut doc = self.snapshot(DocumentKind::Receipt, "0", date, &priced);
        doc.order_ref = Some(order.id);
        self.source.upsert(doc.clone());
        doc
    }

    pub fn invoice(&self, total: &str, date: NaiveDate, lines: &[(&str, &str, Option<&str>)]) -> DocumentSnapshot {
        let doc = self.snapshot(DocumentKind::Invoice, total, date, lines);
        self.source.upsert(doc.clone());
        doc
    }
}
