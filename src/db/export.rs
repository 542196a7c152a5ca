use crate::models::MatchRecord;
use bigdecimal::BigDecimal;
use std::io::Write;

const HEADER: [&str; 18] = [
    "id",
    "order_id",
    "receipt_id",
    "invoice_id",
    "match_type",
    "match_status",
    "confidence_score",
    "amount_variance",
    "amount_variance_pct",
    "quantity_variance",
    "quantity_variance_pct",
    "date_variance",
    "within_tolerance",
    "exception_reason",
    "resolution",
    "override_approved",
    "superseded",
    "created_at",
];

fn option_to_csv<T: ToString>(val: &Option<T>) -> String {
    val.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn decimal(val: &BigDecimal) -> String {
    val.normalized().to_string()
}

/// 导出匹配记录为 CSV (带表头)，供对账审计使用
pub fn write_csv<W: Write>(records: &[MatchRecord], writer: W) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(HEADER)?;

    for r in records {
        writer.write_record(&[
            r.id.to_string(),
            r.order_id.to_string(),
            option_to_csv(&r.receipt_id),
            r.invoice_id.to_string(),
            r.match_type.to_string(),
            r.match_status.to_string(),
            format!("{:.4}", r.confidence_score),
            decimal(&r.amount_variance),
            decimal(&r.amount_variance_pct),
            decimal(&r.quantity_variance),
            decimal(&r.quantity_variance_pct),
            r.date_variance.to_string(),
            r.within_tolerance.to_string(),
            r.exception_reason.clone().unwrap_or_default(),
            option_to_csv(&r.resolution.map(|x| x.as_str())),
            r.override_approved.to_string(),
            r.superseded.to_string(),
            r.created_at.to_rfc3339(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
