use crate::db::{MatchFilter, MatchStore};
use crate::error::MatchError;
use crate::models::{MatchRecord, MatchStatus, Resolution, TolerancePolicy};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::future::Future;
use std::time::{Duration, Instant};
use uuid::Uuid;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

const COLUMNS: &str = "id, tenant_id, order_id, receipt_id, invoice_id, \
    match_type, match_status, confidence_score, \
    amount_variance, amount_variance_pct, quantity_variance, quantity_variance_pct, \
    date_variance, within_tolerance, exception_reason, \
    amount_tolerance_pct, quantity_tolerance_pct, date_tolerance_days, \
    resolution, resolution_note, resolved_by, resolved_at, override_approved, \
    superseded, supersedes, matched_at, matched_by, created_at, updated_at";

/// 与部分唯一索引 `ux_transaction_matches_active` 对应的冲突目标
const ACTIVE_CONFLICT: &str = "ON CONFLICT (tenant_id, order_id, invoice_id) \
    WHERE NOT superseded AND match_status <> 'resolved' DO NOTHING";

/// transaction_matches 表的一行，枚举以文本保存
#[derive(Debug, FromRow)]
struct MatchRecordRow {
    id: Uuid,
    tenant_id: Uuid,
    order_id: Uuid,
    receipt_id: Option<Uuid>,
    invoice_id: Uuid,
    match_type: String,
    match_status: String,
    confidence_score: f64,
    amount_variance: BigDecimal,
    amount_variance_pct: BigDecimal,
    quantity_variance: BigDecimal,
    quantity_variance_pct: BigDecimal,
    date_variance: i64,
    within_tolerance: bool,
    exception_reason: Option<String>,
    amount_tolerance_pct: BigDecimal,
    quantity_tolerance_pct: BigDecimal,
    date_tolerance_days: i64,
    resolution: Option<String>,
    resolution_note: Option<String>,
    resolved_by: Option<Uuid>,
    resolved_at: Option<DateTime<Utc>>,
    override_approved: bool,
    superseded: bool,
    supersedes: Option<Uuid>,
    matched_at: Option<DateTime<Utc>>,
    matched_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MatchRecordRow> for MatchRecord {
    type Error = MatchError;

    fn try_from(row: MatchRecordRow) -> Result<Self, Self::Error> {
        let policy = TolerancePolicy::new(
            row.amount_tolerance_pct,
            row.quantity_tolerance_pct,
            row.date_tolerance_days,
        )
        .map_err(|e| MatchError::Corrupt(format!("match {}: {}", row.id, e)))?;

        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            order_id: row.order_id,
            receipt_id: row.receipt_id,
            invoice_id: row.invoice_id,
            match_type: row.match_type.parse()?,
            match_status: row.match_status.parse()?,
            confidence_score: row.confidence_score,
            amount_variance: row.amount_variance,
            amount_variance_pct: row.amount_variance_pct,
            quantity_variance: row.quantity_variance,
            quantity_variance_pct: row.quantity_variance_pct,
            date_variance: row.date_variance,
            within_tolerance: row.within_tolerance,
            exception_reason: row.exception_reason,
            policy,
            resolution: row.resolution.as_deref().map(str::parse::<Resolution>).transpose()?,
            resolution_note: row.resolution_note,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at,
            override_approved: row.override_approved,
            superseded: row.superseded,
            supersedes: row.supersedes,
            matched_at: row.matched_at,
            matched_by: row.matched_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 按 COLUMNS 的顺序绑定全部字段
fn bind_record<'q>(query: PgQuery<'q>, r: &'q MatchRecord) -> PgQuery<'q> {
    query
        .bind(r.id)
        .bind(r.tenant_id)
        .bind(r.order_id)
        .bind(r.receipt_id)
        .bind(r.invoice_id)
        .bind(r.match_type.as_str())
        .bind(r.match_status.as_str())
        .bind(r.confidence_score)
        .bind(&r.amount_variance)
        .bind(&r.amount_variance_pct)
        .bind(&r.quantity_variance)
        .bind(&r.quantity_variance_pct)
        .bind(r.date_variance)
        .bind(r.within_tolerance)
        .bind(r.exception_reason.as_deref())
        .bind(r.policy.amount_tolerance_pct())
        .bind(r.policy.quantity_tolerance_pct())
        .bind(r.policy.date_tolerance_days())
        .bind(r.resolution.map(|x| x.as_str()))
        .bind(r.resolution_note.as_deref())
        .bind(r.resolved_by)
        .bind(r.resolved_at)
        .bind(r.override_approved)
        .bind(r.superseded)
        .bind(r.supersedes)
        .bind(r.matched_at)
        .bind(r.matched_by)
        .bind(r.created_at)
        .bind(r.updated_at)
}

fn insert_sql() -> String {
    let placeholders = (1..=29).map(|i| format!("${}", i)).collect::<Vec<_>>().join(", ");
    format!(
        "INSERT INTO transaction_matches ({}) VALUES ({}) {} RETURNING id",
        COLUMNS, placeholders, ACTIVE_CONFLICT
    )
}

/// PostgreSQL 匹配记录存储
///
/// 每条语句都带超时；唯一性由部分唯一索引保证，不依赖应用层加锁。
#[derive(Debug, Clone)]
pub struct PgMatchStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgMatchStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn timed<T, E, F>(&self, op: &'static str, fut: F) -> Result<T, MatchError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<MatchError> + std::fmt::Debug,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => {
                tracing::debug!("{} 完成, 耗时: {:?}", op, start.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => {
                tracing::error!("✗ {} 失败, 耗时: {:?}, 错误: {:?}", op, start.elapsed(), e);
                Err(e.into())
            }
            Err(_) => {
                tracing::error!("✗ {} 超时 (>{:?})", op, self.timeout);
                Err(MatchError::Timeout(op))
            }
        }
    }

    /// 旧记录不再是活动记录时给出具体原因
    async fn inactive_reason(&self, tenant_id: Uuid, match_id: Uuid) -> MatchError {
        match self.get(tenant_id, match_id).await {
            Ok(Some(r)) if r.superseded => MatchError::MatchSuperseded(match_id),
            Ok(Some(r)) => MatchError::InvalidTransition {
                from: r.match_status,
                to: MatchStatus::Pending,
            },
            Ok(None) => MatchError::MatchNotFound(match_id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn insert_active(&self, record: &MatchRecord) -> Result<(), MatchError> {
        let sql = insert_sql();
        let inserted = self
            .timed(
                "insert_active",
                bind_record(sqlx::query(&sql), record).fetch_optional(&self.pool),
            )
            .await?;

        match inserted {
            Some(_) => Ok(()),
            None => Err(MatchError::ConcurrentMatchExists {
                order_id: record.order_id,
                invoice_id: record.invoice_id,
            }),
        }
    }

    async fn supersede_and_insert(
        &self,
        tenant_id: Uuid,
        old_id: Uuid,
        record: &MatchRecord,
    ) -> Result<(), MatchError> {
        let sql = insert_sql();
        self.timed("supersede_and_insert", async {
            let mut tx = self.pool.begin().await?;

            let marked = sqlx::query(
                r#"
                UPDATE transaction_matches
                SET superseded = TRUE, updated_at = $3
                WHERE tenant_id = $1 AND id = $2
                  AND NOT superseded
                  AND match_status <> 'resolved'
                RETURNING id
                "#,
            )
            .bind(tenant_id)
            .bind(old_id)
            .bind(record.created_at)
            .fetch_optional(&mut *tx)
            .await?;
            if marked.is_none() {
                // tx 丢弃即回滚
                return Err(self.inactive_reason(tenant_id, old_id).await);
            }

            let inserted = bind_record(sqlx::query(&sql), record)
                .fetch_optional(&mut *tx)
                .await?;
            if inserted.is_none() {
                return Err(MatchError::ConcurrentMatchExists {
                    order_id: record.order_id,
                    invoice_id: record.invoice_id,
                });
            }

            tx.commit().await?;
            Ok::<(), MatchError>(())
        })
        .await
    }

    async fn get(&self, tenant_id: Uuid, match_id: Uuid) -> Result<Option<MatchRecord>, MatchError> {
        let sql = format!(
            "SELECT {} FROM transaction_matches WHERE tenant_id = $1 AND id = $2",
            COLUMNS
        );
        let row = self
            .timed(
                "get_match",
                sqlx::query_as::<_, MatchRecordRow>(&sql)
                    .bind(tenant_id)
                    .bind(match_id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.map(MatchRecord::try_from).transpose()
    }

    async fn update_if_status(
        &self,
        record: &MatchRecord,
        expected: MatchStatus,
    ) -> Result<bool, MatchError> {
        let result = self
            .timed(
                "update_if_status",
                sqlx::query(
                    r#"
                    UPDATE transaction_matches SET
                        match_status = $4,
                        confidence_score = $5,
                        amount_variance = $6,
                        amount_variance_pct = $7,
                        quantity_variance = $8,
                        quantity_variance_pct = $9,
                        date_variance = $10,
                        within_tolerance = $11,
                        exception_reason = $12,
                        resolution = $13,
                        resolution_note = $14,
                        resolved_by = $15,
                        resolved_at = $16,
                        override_approved = $17,
                        matched_at = $18,
                        updated_at = $19
                    WHERE tenant_id = $1 AND id = $2
                      AND match_status = $3
                      AND NOT superseded
                    "#,
                )
                .bind(record.tenant_id)
                .bind(record.id)
                .bind(expected.as_str())
                .bind(record.match_status.as_str())
                .bind(record.confidence_score)
                .bind(&record.amount_variance)
                .bind(&record.amount_variance_pct)
                .bind(&record.quantity_variance)
                .bind(&record.quantity_variance_pct)
                .bind(record.date_variance)
                .bind(record.within_tolerance)
                .bind(record.exception_reason.as_deref())
                .bind(record.resolution.map(|x| x.as_str()))
                .bind(record.resolution_note.as_deref())
                .bind(record.resolved_by)
                .bind(record.resolved_at)
                .bind(record.override_approved)
                .bind(record.matched_at)
                .bind(record.updated_at)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_superseded(&self, tenant_id: Uuid, match_id: Uuid) -> Result<(), MatchError> {
        let marked = self
            .timed(
                "mark_superseded",
                sqlx::query(
                    r#"
                    UPDATE transaction_matches
                    SET superseded = TRUE, updated_at = now()
                    WHERE tenant_id = $1 AND id = $2
                      AND NOT superseded
                      AND match_status <> 'resolved'
                    RETURNING id
                    "#,
                )
                .bind(tenant_id)
                .bind(match_id)
                .fetch_optional(&self.pool),
            )
            .await?;
        if marked.is_some() {
            return Ok(());
        }

        match self.get(tenant_id, match_id).await? {
            None => Err(MatchError::MatchNotFound(match_id)),
            Some(r) if r.superseded => Ok(()),
            Some(_) => Err(MatchError::CannotUnmatchResolved(match_id)),
        }
    }

    async fn list(&self, tenant_id: Uuid, filter: &MatchFilter) -> Result<Vec<MatchRecord>, MatchError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM transaction_matches WHERE tenant_id = ",
            COLUMNS
        ));
        qb.push_bind(tenant_id);
        if !filter.statuses.is_empty() {
            let statuses: Vec<String> = filter.statuses.iter().map(|s| s.as_str().to_string()).collect();
            qb.push(" AND match_status = ANY(");
            qb.push_bind(statuses);
            qb.push(")");
        }
        if let Some(match_type) = filter.match_type {
            qb.push(" AND match_type = ");
            qb.push_bind(match_type.as_str());
        }
        if filter.active_only {
            qb.push(" AND NOT superseded AND match_status <> 'resolved'");
        }
        qb.push(" ORDER BY created_at DESC, id LIMIT ");
        qb.push_bind(filter.limit.max(0));
        qb.push(" OFFSET ");
        qb.push_bind(filter.offset.max(0));

        let rows = self
            .timed(
                "list_matches",
                qb.build_query_as::<MatchRecordRow>().fetch_all(&self.pool),
            )
            .await?;
        tracing::debug!("list_matches 返回 {} 条", rows.len());
        rows.into_iter().map(MatchRecord::try_from).collect()
    }
}
