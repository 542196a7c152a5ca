use crate::db::{MatchFilter, MatchStore, ProcurementSource};
use crate::error::MatchError;
use crate::models::{
    DocumentKind, DocumentSnapshot, DocumentStatus, MatchRecord, MatchStatus, RawDocument,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// (租户, 订单, 发票)
type ActiveKey = (Uuid, Uuid, Uuid);

fn active_key(record: &MatchRecord) -> ActiveKey {
    (record.tenant_id, record.order_id, record.invoice_id)
}

/// 内存匹配记录存储
///
/// `active` 索引相当于数据库里的部分唯一索引。加锁顺序固定为先 `active` 后 `records`。
#[derive(Debug, Default)]
pub struct MemoryMatchStore {
    records: DashMap<Uuid, MatchRecord>,
    active: DashMap<ActiveKey, Uuid>,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn snapshot(&self, tenant_id: Uuid, match_id: Uuid) -> Option<MatchRecord> {
        self.records
            .get(&match_id)
            .map(|r| r.value().clone())
            .filter(|r| r.tenant_id == tenant_id)
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn insert_active(&self, record: &MatchRecord) -> Result<(), MatchError> {
        if !record.is_active() {
            return Err(MatchError::InvalidRequest(format!(
                "match {} is not active and cannot be inserted as such",
                record.id
            )));
        }
        match self.active.entry(active_key(record)) {
            Entry::Occupied(_) => Err(MatchError::ConcurrentMatchExists {
                order_id: record.order_id,
                invoice_id: record.invoice_id,
            }),
            Entry::Vacant(slot) => {
                self.records.insert(record.id, record.clone());
                slot.insert(record.id);
                Ok(())
            }
        }
    }

    async fn supersede_and_insert(
        &self,
        tenant_id: Uuid,
        old_id: Uuid,
        record: &MatchRecord,
    ) -> Result<(), MatchError> {
        let old = self
            .snapshot(tenant_id, old_id)
            .ok_or(MatchError::MatchNotFound(old_id))?;
        let key = active_key(record);
        if active_key(&old) != key {
            return Err(MatchError::InvalidRequest(
                "replacement must reference the same order and invoice".to_string(),
            ));
        }

        let slot = self.active.entry(key);
        {
            let mut stored = self
                .records
                .get_mut(&old_id)
                .ok_or(MatchError::MatchNotFound(old_id))?;
            if stored.superseded {
                return Err(MatchError::MatchSuperseded(old_id));
            }
            if stored.match_status.is_terminal() {
                return Err(MatchError::InvalidTransition {
                    from: stored.match_status,
                    to: MatchStatus::Pending,
                });
            }
            if let Entry::Occupied(ref occupied) = slot {
                if *occupied.get() != old_id {
                    return Err(MatchError::ConcurrentMatchExists {
                        order_id: record.order_id,
                        invoice_id: record.invoice_id,
                    });
                }
            }
            stored.superseded = true;
            stored.updated_at = record.created_at;
        }

        self.records.insert(record.id, record.clone());
        match slot {
            Entry::Occupied(mut occupied) => {
                occupied.insert(record.id);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record.id);
            }
        }
        Ok(())
    }

    async fn get(&self, tenant_id: Uuid, match_id: Uuid) -> Result<Option<MatchRecord>, MatchError> {
        Ok(self.snapshot(tenant_id, match_id))
    }

    async fn update_if_status(
        &self,
        record: &MatchRecord,
        expected: MatchStatus,
    ) -> Result<bool, MatchError> {
        let Some(current) = self.snapshot(record.tenant_id, record.id) else {
            return Ok(false);
        };

        let slot = self.active.entry(active_key(&current));
        let still_active = {
            let Some(mut stored) = self.records.get_mut(&record.id) else {
                return Ok(false);
            };
            if stored.match_status != expected || stored.superseded {
                return Ok(false);
            }
            *stored = record.clone();
            stored.is_active()
        };

        if !still_active {
            if let Entry::Occupied(occupied) = slot {
                if *occupied.get() == record.id {
                    occupied.remove();
                }
            }
        }
        Ok(true)
    }

    async fn mark_superseded(&self, tenant_id: Uuid, match_id: Uuid) -> Result<(), MatchError> {
        let current = self
            .snapshot(tenant_id, match_id)
            .ok_or(MatchError::MatchNotFound(match_id))?;

        let slot = self.active.entry(active_key(&current));
        {
            let mut stored = self
                .records
                .get_mut(&match_id)
                .ok_or(MatchError::MatchNotFound(match_id))?;
            if stored.match_status == MatchStatus::Resolved {
                return Err(MatchError::CannotUnmatchResolved(match_id));
            }
            if stored.superseded {
                return Ok(());
            }
            stored.superseded = true;
            stored.updated_at = Utc::now();
        }

        if let Entry::Occupied(occupied) = slot {
            if *occupied.get() == match_id {
                occupied.remove();
            }
        }
        Ok(())
    }

    async fn list(&self, tenant_id: Uuid, filter: &MatchFilter) -> Result<Vec<MatchRecord>, MatchError> {
        let mut records: Vec<MatchRecord> = self
            .records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(records
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }
}

/// 内存单据来源，用于测试与演示
#[derive(Debug, Default)]
pub struct MemoryProcurementSource {
    documents: DashMap<Uuid, DocumentSnapshot>,
}

impl MemoryProcurementSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, document: DocumentSnapshot) {
        self.documents.insert(document.id, document);
    }

    /// 经过边界校验后写入
    pub fn insert_raw(&self, raw: RawDocument) -> Result<Uuid, MatchError> {
        let snapshot = DocumentSnapshot::try_from(raw)?;
        let id = snapshot.id;
        self.upsert(snapshot);
        Ok(id)
    }

    /// 模拟源系统修改单据：执行修改并递增 revision
    pub fn modify<F>(&self, id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut DocumentSnapshot),
    {
        match self.documents.get_mut(&id) {
            Some(mut doc) => {
                f(&mut doc);
                doc.revision += 1;
                true
            }
            None => false,
        }
    }

    pub fn set_status(&self, id: Uuid, status: DocumentStatus) -> bool {
        self.modify(id, |doc| doc.status = status)
    }

    fn collect<P>(&self, predicate: P) -> Vec<DocumentSnapshot>
    where
        P: Fn(&DocumentSnapshot) -> bool,
    {
        let mut docs: Vec<DocumentSnapshot> = self
            .documents
            .iter()
            .filter(|d| predicate(d.value()))
            .map(|d| d.value().clone())
            .collect();
        docs.sort_by(|a, b| a.document_date.cmp(&b.document_date).then_with(|| a.id.cmp(&b.id)));
        docs
    }
}

#[async_trait]
impl ProcurementSource for MemoryProcurementSource {
    async fn document(
        &self,
        tenant_id: Uuid,
        kind: DocumentKind,
        id: Uuid,
    ) -> Result<Option<DocumentSnapshot>, MatchError> {
        Ok(self
            .documents
            .get(&id)
            .map(|d| d.value().clone())
            .filter(|d| d.tenant_id == tenant_id && d.kind == kind))
    }

    async fn open_orders(
        &self,
        tenant_id: Uuid,
        counterparty_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<DocumentSnapshot>, MatchError> {
        Ok(self.collect(|d| {
            d.tenant_id == tenant_id
                && d.kind == DocumentKind::Order
                && d.counterparty_id == counterparty_id
                && d.is_open()
                && d.document_date >= since
        }))
    }

    async fn receipts_for_order(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> Result<Vec<DocumentSnapshot>, MatchError> {
        Ok(self.collect(|d| {
            d.tenant_id == tenant_id
                && d.kind == DocumentKind::Receipt
                && d.order_ref == Some(order_id)
                && d.is_open()
        }))
    }
}
