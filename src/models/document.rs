use crate::error::MatchError;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 参与匹配的单据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// 采购订单
    Order,
    /// 收货单
    Receipt,
    /// 发票 / 账单
    Invoice,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Receipt => "receipt",
            Self::Invoice => "invoice",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" | "purchase_order" => Ok(Self::Order),
            "receipt" | "delivery_order" | "goods_receipt" => Ok(Self::Receipt),
            "invoice" | "bill" => Ok(Self::Invoice),
            other => Err(MatchError::InvalidRequest(format!("unknown document kind `{}`", other))),
        }
    }
}

/// 单据在源系统中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Open,
    Closed,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(MatchError::InvalidRequest(format!("unknown document status `{}`", other))),
        }
    }
}

/// 单据明细行
///
/// 收货单的 `quantity` 是验收合格数量；实收数量另存于 `quantity_received`，
/// 拒收或损坏的部分不参与匹配。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLine {
    pub quantity: BigDecimal,
    pub quantity_received: Option<BigDecimal>,
    pub unit_price: Option<BigDecimal>,
}

impl DocumentLine {
    pub fn new(quantity: BigDecimal, unit_price: Option<BigDecimal>) -> Self {
        Self {
            quantity,
            quantity_received: None,
            unit_price,
        }
    }
}

/// 匹配时读取的单据快照 (只读，不回写来源系统)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: DocumentKind,
    /// 供应商 / 客户
    pub counterparty_id: Uuid,
    /// 收货单或发票引用的采购订单
    pub order_ref: Option<Uuid>,
    pub total_amount: BigDecimal,
    pub currency: String,
    pub document_date: NaiveDate,
    /// 采购订单的预计交货日期
    pub expected_date: Option<NaiveDate>,
    pub status: DocumentStatus,
    /// 源系统每次修改都会递增
    pub revision: i64,
    pub lines: IndexMap<String, DocumentLine>,
}

impl DocumentSnapshot {
    pub fn is_open(&self) -> bool {
        self.status == DocumentStatus::Open
    }
}

/// 抽取服务 / 源系统返回的原始单据，字段均可能缺失
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct RawDocument {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: String,
    pub counterparty_id: Option<Uuid>,
    pub order_ref: Option<Uuid>,
    pub total_amount: Option<BigDecimal>,
    pub currency: Option<String>,
    pub document_date: Option<NaiveDate>,
    pub expected_date: Option<NaiveDate>,
    pub status: Option<String>,
    #[serde(default)]
    pub revision: i64,
    #[sqlx(skip)]
    #[serde(default)]
    pub lines: Vec<RawDocumentLine>,
}

/// 原始明细行
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct RawDocumentLine {
    #[serde(default)]
    pub document_id: Option<Uuid>,
    pub line_key: Option<String>,
    pub quantity: Option<BigDecimal>,
    pub quantity_accepted: Option<BigDecimal>,
    pub unit_price: Option<BigDecimal>,
}

fn required<T>(value: Option<T>, document_id: Uuid, field: &'static str) -> Result<T, MatchError> {
    value.ok_or(MatchError::MissingField { document_id, field })
}

impl TryFrom<RawDocument> for DocumentSnapshot {
    type Error = MatchError;

    /// 边界处强类型化：缺少必填字段直接失败，不以 0 或空值代替
    fn try_from(raw: RawDocument) -> Result<Self, Self::Error> {
        let id = raw.id;
        let kind: DocumentKind = raw.kind.parse()?;
        let status: DocumentStatus = required(raw.status, id, "status")?.parse()?;
        let currency = required(raw.currency, id, "currency")?;
        if currency.trim().is_empty() {
            return Err(MatchError::MissingField { document_id: id, field: "currency" });
        }

        let mut lines = IndexMap::with_capacity(raw.lines.len());
        for line in raw.lines {
            let key = required(line.line_key, id, "line_key")?;
            let document_line = match kind {
                DocumentKind::Receipt => DocumentLine {
                    quantity: required(line.quantity_accepted, id, "quantity_accepted")?,
                    quantity_received: line.quantity,
                    unit_price: line.unit_price,
                },
                _ => DocumentLine {
                    quantity: required(line.quantity, id, "quantity")?,
                    quantity_received: None,
                    unit_price: line.unit_price,
                },
            };
            if lines.insert(key, document_line).is_some() {
                return Err(MatchError::InvalidRequest(format!(
                    "document {} has duplicate line keys",
                    id
                )));
            }
        }

        Ok(Self {
            id,
            tenant_id: raw.tenant_id,
            kind,
            counterparty_id: required(raw.counterparty_id, id, "counterparty_id")?,
            order_ref: raw.order_ref,
            total_amount: required(raw.total_amount, id, "total_amount")?,
            currency: currency.trim().to_uppercase(),
            document_date: required(raw.document_date, id, "document_date")?,
            expected_date: raw.expected_date,
            status,
            revision: raw.revision,
            lines,
        })
    }
}
