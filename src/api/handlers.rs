use crate::api::{ApiError, AppState};
use crate::db::{write_csv, MatchFilter};
use crate::error::MatchError;
use crate::models::{MatchRecord, MatchStatus, MatchType, Resolution, ToleranceOverride};
use crate::service::{BatchSummary, ManualMatch};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: Uuid,
}

/// 列表查询参数；status 支持逗号分隔多个值
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub tenant_id: Uuid,
    pub status: Option<String>,
    pub match_type: Option<MatchType>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub tenant_id: Uuid,
    pub status: Option<String>,
}

/// 请求体: 人工匹配
#[derive(Debug, Deserialize)]
pub struct ManualMatchRequest {
    pub tenant_id: Uuid,
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

/// 请求体: 单张发票自动匹配
#[derive(Debug, Deserialize)]
pub struct CandidatesRequest {
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
}

/// 请求体: 发票ID列表
#[derive(Debug, Deserialize)]
pub struct BatchMatchRequest {
    pub tenant_id: Uuid,
    pub invoice_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub tenant_id: Uuid,
    pub resolution: Resolution,
    pub resolver_id: Uuid,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct TenantBody {
    pub tenant_id: Uuid,
}

/// 分页列表响应
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub items: Vec<MatchRecord>,
    pub page: i64,
    pub limit: i64,
}

fn parse_statuses(raw: Option<&str>) -> Result<Vec<MatchStatus>, ApiError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<MatchStatus>()
                .map_err(|_| ApiError::bad_request(format!("unknown status `{}`", s)))
        })
        .collect()
}

/// (page - 1) * limit，溢出视为非法请求
fn page_offset(page: i64, limit: i64) -> Result<i64, ApiError> {
    page.checked_sub(1)
        .and_then(|p| p.checked_mul(limit))
        .ok_or_else(|| ApiError::bad_request(format!("page {} is out of range", page)))
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 待人工处理的 exception / partial 记录
pub async fn pending(
    State(state): State<AppState>,
    Query(q): Query<TenantQuery>,
) -> Result<Json<Vec<MatchRecord>>, ApiError> {
    let records = state.orchestrator.pending(q.tenant_id).await?;
    Ok(Json(records))
}

/// 分页列表 (新记录在前)
pub async fn list_matches(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let page = q.page.unwrap_or(1);
    let limit = q.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if page < 1 {
        return Err(ApiError::bad_request("page must be >= 1"));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(ApiError::bad_request(format!("limit must be within 1..={}", MAX_PAGE_SIZE)));
    }

    let offset = page_offset(page, limit)?;

    let filter = MatchFilter {
        statuses: parse_statuses(q.status.as_deref())?,
        match_type: q.match_type,
        active_only: false,
        offset,
        limit,
    };
    let items = state.orchestrator.list(q.tenant_id, &filter).await?;
    Ok(Json(ListResponse { items, page, limit }))
}

/// 人工指定单据匹配
pub async fn manual_match(
    State(state): State<AppState>,
    Json(req): Json<ManualMatchRequest>,
) -> Result<(StatusCode, Json<MatchRecord>), ApiError> {
    let policy = state.policies.for_tenant(req.tenant_id);
    let request = ManualMatch {
        order_id: req.order_id,
        receipt_id: req.receipt_id,
        invoice_id: req.invoice_id,
        match_type: req.match_type,
        tolerance_override: req.tolerance_override,
        matched_by: req.matched_by,
    };
    let record = state
        .orchestrator
        .manual_match(req.tenant_id, request, policy)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// 单张发票自动匹配
pub async fn match_candidates(
    State(state): State<AppState>,
    Json(req): Json<CandidatesRequest>,
) -> Result<(StatusCode, Json<MatchRecord>), ApiError> {
    let policy = state.policies.for_tenant(req.tenant_id);
    let record = state
        .orchestrator
        .match_candidates(req.tenant_id, req.invoice_id, policy)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// 批量自动匹配接口
pub async fn batch_match(
    State(state): State<AppState>,
    Json(req): Json<BatchMatchRequest>,
) -> Json<BatchSummary> {
    tracing::info!("批量匹配请求: tenant {} 发票 {} 张", req.tenant_id, req.invoice_ids.len());
    let policy = state.policies.for_tenant(req.tenant_id);
    let summary = state
        .orchestrator
        .match_batch(req.tenant_id, &req.invoice_ids, policy)
        .await;
    Json(summary)
}

pub async fn get_match(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<TenantQuery>,
) -> Result<Json<MatchRecord>, ApiError> {
    Ok(Json(state.orchestrator.get(q.tenant_id, id).await?))
}

pub async fn resolve_match(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<MatchRecord>, ApiError> {
    let record = state
        .orchestrator
        .resolve(req.tenant_id, id, req.resolution, req.resolver_id, &req.note)
        .await?;
    Ok(Json(record))
}

pub async fn unmatch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TenantBody>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.unmatch(req.tenant_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn rematch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TenantBody>,
) -> Result<(StatusCode, Json<MatchRecord>), ApiError> {
    let record = state.orchestrator.rematch(req.tenant_id, id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// 导出 CSV
pub async fn export(
    State(state): State<AppState>,
    Query(q): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let filter = MatchFilter {
        statuses: parse_statuses(q.status.as_deref())?,
        limit: i64::MAX,
        ..Default::default()
    };
    let records = state.orchestrator.list(q.tenant_id, &filter).await?;

    let mut body = Vec::new();
    write_csv(&records, &mut body)
        .map_err(|e| ApiError(MatchError::Corrupt(format!("csv export failed: {}", e))))?;
    tracing::info!("导出 {} 条匹配记录 (tenant {})", records.len(), q.tenant_id);

    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response())
}
