pub mod export;
pub mod memory;
pub mod pool;
pub mod procurement;
pub mod queries;

use crate::error::MatchError;
use crate::models::{DocumentKind, DocumentSnapshot, MatchRecord, MatchStatus, MatchType};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

pub use export::write_csv;
pub use memory::{MemoryMatchStore, MemoryProcurementSource};
pub use pool::{create_pool, run_migrations};
pub use procurement::PgProcurementSource;
pub use queries::PgMatchStore;

/// 列表查询条件
#[derive(Debug, Clone)]
pub struct MatchFilter {
    pub statuses: Vec<MatchStatus>,
    pub match_type: Option<MatchType>,
    pub active_only: bool,
    pub offset: i64,
    pub limit: i64,
}

impl Default for MatchFilter {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            match_type: None,
            active_only: false,
            offset: 0,
            limit: 50,
        }
    }
}

impl MatchFilter {
    /// 待人工处理队列：活动的 exception / partial
    pub fn pending_review() -> Self {
        Self {
            statuses: MatchStatus::ALL.into_iter().filter(MatchStatus::needs_review).collect(),
            active_only: true,
            limit: i64::MAX,
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &MatchRecord) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&record.match_status))
            && self.match_type.map_or(true, |t| t == record.match_type)
            && (!self.active_only || record.is_active())
    }
}

/// 匹配记录存储
///
/// 所有调用都显式带租户；写入均为单条原子语句 (或单个事务)，
/// 调用被取消时不会留下半成品记录。
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// 条件插入：同一 (租户, 订单, 发票) 已有活动记录时返回 `ConcurrentMatchExists`
    async fn insert_active(&self, record: &MatchRecord) -> Result<(), MatchError>;

    /// 原子地替代旧记录并插入新记录
    async fn supersede_and_insert(
        &self,
        tenant_id: Uuid,
        old_id: Uuid,
        record: &MatchRecord,
    ) -> Result<(), MatchError>;

    async fn get(&self, tenant_id: Uuid, match_id: Uuid) -> Result<Option<MatchRecord>, MatchError>;

    /// 仅当存量记录仍处于 `expected` 且未被替代时写入，返回是否写入
    async fn update_if_status(
        &self,
        record: &MatchRecord,
        expected: MatchStatus,
    ) -> Result<bool, MatchError>;

    /// 标记为 superseded；重复调用成功，已解决的记录返回 `CannotUnmatchResolved`
    async fn mark_superseded(&self, tenant_id: Uuid, match_id: Uuid) -> Result<(), MatchError>;

    async fn list(&self, tenant_id: Uuid, filter: &MatchFilter) -> Result<Vec<MatchRecord>, MatchError>;
}

/// 采购单据来源 (只读)
#[async_trait]
pub trait ProcurementSource: Send + Sync {
    async fn document(
        &self,
        tenant_id: Uuid,
        kind: DocumentKind,
        id: Uuid,
    ) -> Result<Option<DocumentSnapshot>, MatchError>;

    /// 某供应商在 `since` (含) 之后的未关闭订单
    async fn open_orders(
        &self,
        tenant_id: Uuid,
        counterparty_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<DocumentSnapshot>, MatchError>;

    /// 引用某订单的未关闭收货单
    async fn receipts_for_order(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> Result<Vec<DocumentSnapshot>, MatchError>;
}
