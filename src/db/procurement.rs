use crate::db::ProcurementSource;
use crate::error::MatchError;
use crate::models::{DocumentKind, DocumentSnapshot, DocumentStatus, RawDocument, RawDocumentLine};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

const DOCUMENT_COLUMNS: &str = "id, tenant_id, kind, counterparty_id, order_ref, total_amount, \
    currency, document_date, expected_date, status, revision";

/// 从 procurement_documents 读取单据快照
///
/// 只读；行数据在这里统一经过 [`DocumentSnapshot::try_from`] 校验。
#[derive(Debug, Clone)]
pub struct PgProcurementSource {
    pool: PgPool,
}

impl PgProcurementSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 批量加载明细行并组装快照
    async fn assemble(&self, mut docs: Vec<RawDocument>) -> Result<Vec<DocumentSnapshot>, MatchError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = docs.iter().map(|d| d.id).collect();

        let lines = sqlx::query_as::<_, RawDocumentLine>(
            r#"
            SELECT document_id, line_key, quantity, quantity_accepted, unit_price
            FROM procurement_document_lines
            WHERE document_id = ANY($1)
            ORDER BY document_id, line_key
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_document: HashMap<Uuid, Vec<RawDocumentLine>> = HashMap::new();
        for line in lines {
            if let Some(document_id) = line.document_id {
                by_document.entry(document_id).or_default().push(line);
            }
        }
        for doc in docs.iter_mut() {
            doc.lines = by_document.remove(&doc.id).unwrap_or_default();
        }

        docs.into_iter().map(DocumentSnapshot::try_from).collect()
    }
}

#[async_trait]
impl ProcurementSource for PgProcurementSource {
    async fn document(
        &self,
        tenant_id: Uuid,
        kind: DocumentKind,
        id: Uuid,
    ) -> Result<Option<DocumentSnapshot>, MatchError> {
        let sql = format!(
            "SELECT {} FROM procurement_documents WHERE tenant_id = $1 AND id = $2",
            DOCUMENT_COLUMNS
        );
        let Some(raw) = sqlx::query_as::<_, RawDocument>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        // kind 别名 (bill / delivery_order ...) 在解析后比较
        if raw.kind.parse::<DocumentKind>()? != kind {
            return Ok(None);
        }
        Ok(self.assemble(vec![raw]).await?.pop())
    }

    async fn open_orders(
        &self,
        tenant_id: Uuid,
        counterparty_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<DocumentSnapshot>, MatchError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM procurement_documents
            WHERE tenant_id = $1
              AND kind IN ('order', 'purchase_order')
              AND counterparty_id = $2
              AND status = $4
              AND document_date >= $3
            ORDER BY document_date, id
            "#,
            DOCUMENT_COLUMNS
        );
        let raws = sqlx::query_as::<_, RawDocument>(&sql)
            .bind(tenant_id)
            .bind(counterparty_id)
            .bind(since)
            .bind(DocumentStatus::Open.as_str())
            .fetch_all(&self.pool)
            .await?;
        tracing::debug!("供应商 {} 未关闭订单 {} 张 (since {})", counterparty_id, raws.len(), since);
        self.assemble(raws).await
    }

    async fn receipts_for_order(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> Result<Vec<DocumentSnapshot>, MatchError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM procurement_documents
            WHERE tenant_id = $1
              AND kind IN ('receipt', 'delivery_order', 'goods_receipt')
              AND order_ref = $2
              AND status = $3
            ORDER BY document_date, id
            "#,
            DOCUMENT_COLUMNS
        );
        let raws = sqlx::query_as::<_, RawDocument>(&sql)
            .bind(tenant_id)
            .bind(order_id)
            .bind(DocumentStatus::Open.as_str())
            .fetch_all(&self.pool)
            .await?;
        self.assemble(raws).await
    }
}
