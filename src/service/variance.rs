use crate::error::MatchError;
use crate::models::{DocumentKind, DocumentLine, DocumentSnapshot, VarianceResult};
use bigdecimal::{BigDecimal, Zero};
use indexmap::IndexMap;

/// 比例 = 分子 / 分母，分母为 0 时无定义
pub fn ratio(numerator: &BigDecimal, denominator: &BigDecimal) -> Result<BigDecimal, MatchError> {
    if denominator.is_zero() {
        return Err(MatchError::DivisionUndefined);
    }
    Ok(numerator / denominator)
}

/// 分母为 0 时：分子非零按 100% 计 (保留符号)，否则为 0%
fn share(numerator: &BigDecimal, denominator: &BigDecimal) -> BigDecimal {
    match ratio(numerator, denominator) {
        Ok(r) => r,
        Err(_) if numerator.is_zero() => BigDecimal::zero(),
        Err(_) if *numerator > BigDecimal::zero() => BigDecimal::from(1),
        Err(_) => BigDecimal::from(-1),
    }
}

fn expect_kind(doc: &DocumentSnapshot, kind: DocumentKind) -> Result<(), MatchError> {
    if doc.kind != kind {
        return Err(MatchError::InvalidRequest(format!(
            "document {} is a {}, expected a {}",
            doc.id, doc.kind, kind
        )));
    }
    Ok(())
}

/// 计算订单 / 收货单 (可选) / 发票之间的差异
///
/// 纯计算，不访问存储。receipt 为 None 时按两单匹配处理。
pub fn compute_variance(
    order: &DocumentSnapshot,
    receipt: Option<&DocumentSnapshot>,
    invoice: &DocumentSnapshot,
) -> Result<VarianceResult, MatchError> {
    expect_kind(order, DocumentKind::Order)?;
    expect_kind(invoice, DocumentKind::Invoice)?;
    if let Some(r) = receipt {
        expect_kind(r, DocumentKind::Receipt)?;
    }
    if order.currency != invoice.currency {
        return Err(MatchError::CurrencyMismatch {
            order: order.currency.clone(),
            invoice: invoice.currency.clone(),
        });
    }

    let (amount_variance, amount_pct) = amount_variance(order, receipt, invoice);
    let (quantity_variance, quantity_pct) = quantity_variance(order, receipt, invoice)?;
    let date_variance = date_variance(order, receipt, invoice)?;

    Ok(VarianceResult {
        amount_variance,
        amount_pct,
        quantity_variance,
        quantity_pct,
        date_variance,
    })
}

/// 金额差异：发票对订单；三单匹配时另与验收金额比较，取比例绝对值较大者
fn amount_variance(
    order: &DocumentSnapshot,
    receipt: Option<&DocumentSnapshot>,
    invoice: &DocumentSnapshot,
) -> (BigDecimal, BigDecimal) {
    let against_order = &invoice.total_amount - &order.total_amount;
    if order.total_amount.is_zero() {
        tracing::warn!(
            "Order {} has zero total, invoice {} amount variance taken as {}",
            order.id,
            invoice.id,
            if against_order.is_zero() { "0%" } else { "100%" }
        );
    }
    let order_pct = share(&against_order, &order.total_amount);

    let Some(received) = receipt.and_then(|r| received_value(order, r, invoice)) else {
        return (against_order, order_pct);
    };

    let against_receipt = &invoice.total_amount - &received;
    let receipt_pct = share(&against_receipt, &received);
    if receipt_pct.abs() > order_pct.abs() {
        (against_receipt, receipt_pct)
    } else {
        (against_order, order_pct)
    }
}

/// 开票行的验收金额 = Σ 验收数量 × 订单单价
///
/// 只看开票的行；收货单上的其他行 (托盘、运费等) 不影响结果。
/// 任一开票行没有收货记录或订单单价时不可计算。
fn received_value(
    order: &DocumentSnapshot,
    receipt: &DocumentSnapshot,
    invoice: &DocumentSnapshot,
) -> Option<BigDecimal> {
    if invoice.lines.is_empty() {
        return None;
    }
    let mut total = BigDecimal::zero();
    for key in invoice.lines.keys() {
        let accepted = &receipt.lines.get(key)?.quantity;
        let price = order.lines.get(key)?.unit_price.as_ref()?;
        total += accepted * price;
    }
    Some(total)
}

/// 数量差异：按行金额加权的比例
///
/// 三单匹配以收货验收数量为参考，两单匹配以订单数量为参考。
/// 两单匹配且任一方没有明细时无数量维度，差异为 0。
fn quantity_variance(
    order: &DocumentSnapshot,
    receipt: Option<&DocumentSnapshot>,
    invoice: &DocumentSnapshot,
) -> Result<(BigDecimal, BigDecimal), MatchError> {
    let reference: &IndexMap<String, DocumentLine> = match receipt {
        Some(r) => {
            if r.lines.is_empty() {
                return Err(MatchError::MissingField {
                    document_id: r.id,
                    field: "line_quantities",
                });
            }
            if invoice.lines.is_empty() {
                return Err(MatchError::MissingField {
                    document_id: invoice.id,
                    field: "line_quantities",
                });
            }
            &r.lines
        }
        None => {
            if order.lines.is_empty() || invoice.lines.is_empty() {
                return Ok((BigDecimal::zero(), BigDecimal::zero()));
            }
            &order.lines
        }
    };

    let mut total_diff = BigDecimal::zero();
    let mut weighted = BigDecimal::zero();
    let mut weight_sum = BigDecimal::zero();
    let mut plain_sum = BigDecimal::zero();

    for (key, line) in &invoice.lines {
        let order_line = order.lines.get(key);
        let reference_qty = reference
            .get(key)
            .map(|l| l.quantity.clone())
            .unwrap_or_else(BigDecimal::zero);
        let diff = &line.quantity - &reference_qty;

        // 比例基数：订单行数量，订单无此行时用开票数量
        let base = order_line
            .map(|l| &l.quantity)
            .filter(|q| !q.is_zero())
            .unwrap_or(&line.quantity);
        let pct = share(&diff, base);

        let price = line
            .unit_price
            .as_ref()
            .or_else(|| order_line.and_then(|l| l.unit_price.as_ref()))
            .ok_or(MatchError::MissingField {
                document_id: invoice.id,
                field: "unit_price",
            })?;
        let weight = (&line.quantity * price).abs();

        weighted += &pct * &weight;
        weight_sum += weight;
        plain_sum += pct;
        total_diff += diff;
    }

    let pct = if weight_sum.is_zero() {
        plain_sum / BigDecimal::from(invoice.lines.len() as i64)
    } else {
        weighted / weight_sum
    };

    Ok((total_diff, pct))
}

/// 日期差异 (天)：三单以收货日期为参考，两单以订单预计交货日期为参考
fn date_variance(
    order: &DocumentSnapshot,
    receipt: Option<&DocumentSnapshot>,
    invoice: &DocumentSnapshot,
) -> Result<i64, MatchError> {
    let reference = match receipt {
        Some(r) => r.document_date,
        None => order.expected_date.ok_or(MatchError::MissingField {
            document_id: order.id,
            field: "expected_date",
        })?,
    };
    Ok((invoice.document_date - reference).num_days())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, TolerancePolicy};
    use crate::service::evaluate;
    use chrono::NaiveDate;
    use std::str::FromStr;
    use uuid::Uuid;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn doc(kind: DocumentKind, total: &str, day: u32, lines: &[(&str, &str, Option<&str>)]) -> DocumentSnapshot {
        DocumentSnapshot {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            kind,
            counterparty_id: Uuid::nil(),
            order_ref: None,
            total_amount: dec(total),
            currency: "USD".to_string(),
            document_date: date(day),
            expected_date: Some(date(day + 5)),
            status: DocumentStatus::Open,
            revision: 1,
            lines: lines
                .iter()
                .map(|(k, q, p)| (k.to_string(), DocumentLine::new(dec(q), p.map(dec))))
                .collect(),
        }
    }

    #[test]
    fn ratio_rejects_zero_base() {
        assert!(matches!(
            ratio(&dec("5"), &BigDecimal::zero()),
            Err(MatchError::DivisionUndefined)
        ));
        assert_eq!(ratio(&dec("200"), &dec("10000")).unwrap(), dec("0.02"));
    }

    #[test]
    fn two_way_amount_variance_is_relative_to_order() {
        let order = doc(DocumentKind::Order, "10000", 1, &[]);
        let invoice = doc(DocumentKind::Invoice, "10200", 6, &[]);
        let v = compute_variance(&order, None, &invoice).unwrap();
        assert_eq!(v.amount_variance, dec("200"));
        assert_eq!(v.amount_pct, dec("0.02"));
        assert_eq!(v.quantity_variance, BigDecimal::zero());
        // 发票日期 = 订单预计交货日期
        assert_eq!(v.date_variance, 0);
    }

    #[test]
    fn zero_order_total_counts_as_full_variance() {
        let order = doc(DocumentKind::Order, "0", 1, &[]);
        let invoice = doc(DocumentKind::Invoice, "50", 6, &[]);
        let v = compute_variance(&order, None, &invoice).unwrap();
        assert_eq!(v.amount_pct, dec("1"));

        let free = doc(DocumentKind::Invoice, "0", 6, &[]);
        let v = compute_variance(&order, None, &free).unwrap();
        assert_eq!(v.amount_pct, BigDecimal::zero());
    }

    #[test]
    fn three_way_uses_accepted_quantity() {
        let order = doc(DocumentKind::Order, "1000", 1, &[("SKU-1", "100", Some("10"))]);
        let mut receipt = doc(DocumentKind::Receipt, "0", 8, &[("SKU-1", "95", None)]);
        receipt.lines["SKU-1"].quantity_received = Some(dec("100"));
        let invoice = doc(DocumentKind::Invoice, "1000", 10, &[("SKU-1", "100", Some("10"))]);

        let v = compute_variance(&order, Some(&receipt), &invoice).unwrap();
        assert_eq!(v.quantity_variance, dec("5"));
        assert_eq!(v.quantity_pct, dec("0.05"));
        // 验收金额 950，发票 1000：高于订单口径 (0%)
        assert_eq!(v.amount_variance, dec("50"));
        assert!(v.amount_pct > dec("0.05"));
        assert_eq!(v.date_variance, 2);
    }

    #[test]
    fn low_value_line_does_not_dominate() {
        let order = doc(
            DocumentKind::Order,
            "10010",
            1,
            &[("BIG", "100", Some("100")), ("SMALL", "10", Some("1"))],
        );
        let receipt = doc(DocumentKind::Receipt, "0", 8, &[("BIG", "100", None), ("SMALL", "5", None)]);
        let invoice = doc(
            DocumentKind::Invoice,
            "10010",
            8,
            &[("BIG", "100", Some("100")), ("SMALL", "10", Some("1"))],
        );

        let v = compute_variance(&order, Some(&receipt), &invoice).unwrap();
        assert_eq!(v.quantity_variance, dec("5"));
        // SMALL 行 50% 差异，金额权重 10 / 10010
        assert!(v.quantity_pct < dec("0.001"));
        assert!(v.quantity_pct > BigDecimal::zero());
    }

    #[test]
    fn extra_receipt_line_keeps_amount_check() {
        let order = doc(DocumentKind::Order, "1000", 1, &[("A", "100", Some("10"))]);
        let receipt = doc(
            DocumentKind::Receipt,
            "0",
            5,
            &[("A", "50", None), ("PALLET", "1", None)],
        );
        let invoice = doc(DocumentKind::Invoice, "1000", 6, &[("A", "100", Some("10"))]);

        let v = compute_variance(&order, Some(&receipt), &invoice).unwrap();
        // 开票 1000，验收 500
        assert_eq!(v.amount_variance, dec("500"));
        assert_eq!(v.amount_pct, dec("1"));
        assert_eq!(v.quantity_pct, dec("0.5"));
    }

    #[test]
    fn unreceived_invoice_line_falls_back_to_order_total() {
        let order = doc(
            DocumentKind::Order,
            "1100",
            1,
            &[("A", "100", Some("10")), ("B", "10", Some("10"))],
        );
        let receipt = doc(DocumentKind::Receipt, "0", 5, &[("A", "100", None)]);
        let invoice = doc(
            DocumentKind::Invoice,
            "1100",
            6,
            &[("A", "100", Some("10")), ("B", "10", Some("10"))],
        );

        let v = compute_variance(&order, Some(&receipt), &invoice).unwrap();
        assert_eq!(v.amount_variance, BigDecimal::zero());
        assert_eq!(v.quantity_variance, dec("10"));
    }

    #[test]
    fn two_way_short_billing_is_negative() {
        let order = doc(DocumentKind::Order, "1000", 1, &[("A", "100", Some("10"))]);
        let invoice = doc(DocumentKind::Invoice, "900", 6, &[("A", "90", Some("10"))]);
        let v = compute_variance(&order, None, &invoice).unwrap();
        assert_eq!(v.quantity_variance, dec("-10"));
        assert_eq!(v.quantity_pct, dec("-0.1"));
        assert_eq!(v.amount_pct, dec("-0.1"));
    }

    #[test]
    fn zero_order_quantity_uses_invoiced_quantity_as_base() {
        let order = doc(DocumentKind::Order, "0", 1, &[("A", "0", Some("10"))]);
        let invoice = doc(DocumentKind::Invoice, "50", 6, &[("A", "5", Some("10"))]);
        let v = compute_variance(&order, None, &invoice).unwrap();
        assert_eq!(v.quantity_variance, dec("5"));
        assert_eq!(v.quantity_pct, dec("1"));

        let nothing = doc(DocumentKind::Invoice, "0", 6, &[("A", "0", Some("10"))]);
        let v = compute_variance(&order, None, &nothing).unwrap();
        assert_eq!(v.quantity_pct, BigDecimal::zero());
    }

    #[test]
    fn zero_weights_use_plain_mean() {
        let order = doc(
            DocumentKind::Order,
            "0",
            1,
            &[("A", "100", Some("0")), ("B", "100", Some("0"))],
        );
        let invoice = doc(
            DocumentKind::Invoice,
            "0",
            6,
            &[("A", "110", Some("0")), ("B", "100", Some("0"))],
        );
        let v = compute_variance(&order, None, &invoice).unwrap();
        assert_eq!(v.quantity_variance, dec("10"));
        assert_eq!(v.quantity_pct, dec("0.05"));
    }

    #[test]
    fn same_documents_give_same_evaluation() {
        let order = doc(
            DocumentKind::Order,
            "10010",
            1,
            &[("BIG", "100", Some("100")), ("SMALL", "10", Some("1"))],
        );
        let receipt = doc(DocumentKind::Receipt, "0", 8, &[("BIG", "97", None), ("SMALL", "10", None)]);
        let invoice = doc(
            DocumentKind::Invoice,
            "10013",
            11,
            &[("BIG", "100", Some("100")), ("SMALL", "13", Some("1"))],
        );
        let policy = TolerancePolicy::new(dec("0.05"), dec("0.05"), 5).unwrap();

        let first = compute_variance(&order, Some(&receipt), &invoice).unwrap();
        let second = compute_variance(&order.clone(), Some(&receipt.clone()), &invoice.clone()).unwrap();
        assert_eq!(first, second);

        let a = evaluate(&order, Some(&receipt), &invoice, &policy).unwrap();
        let b = evaluate(&order, Some(&receipt), &invoice, &policy).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.variance, first);
    }

    #[test]
    fn early_invoice_keeps_negative_sign() {
        let order = doc(DocumentKind::Order, "100", 1, &[("A", "1", Some("100"))]);
        let receipt = doc(DocumentKind::Receipt, "0", 20, &[("A", "1", None)]);
        let invoice = doc(DocumentKind::Invoice, "100", 17, &[("A", "1", Some("100"))]);
        let v = compute_variance(&order, Some(&receipt), &invoice).unwrap();
        assert_eq!(v.date_variance, -3);
    }

    #[test]
    fn two_way_requires_expected_date() {
        let mut order = doc(DocumentKind::Order, "100", 1, &[]);
        order.expected_date = None;
        let invoice = doc(DocumentKind::Invoice, "100", 6, &[]);
        assert!(matches!(
            compute_variance(&order, None, &invoice),
            Err(MatchError::MissingField { field: "expected_date", .. })
        ));
    }

    #[test]
    fn invoice_line_without_any_price_is_rejected() {
        let order = doc(DocumentKind::Order, "100", 1, &[("A", "10", None)]);
        let receipt = doc(DocumentKind::Receipt, "0", 5, &[("A", "10", None)]);
        let invoice = doc(DocumentKind::Invoice, "100", 6, &[("A", "10", None)]);
        assert!(matches!(
            compute_variance(&order, Some(&receipt), &invoice),
            Err(MatchError::MissingField { field: "unit_price", .. })
        ));
    }

    #[test]
    fn currency_mismatch_is_rejected() {
        let order = doc(DocumentKind::Order, "100", 1, &[]);
        let mut invoice = doc(DocumentKind::Invoice, "100", 6, &[]);
        invoice.currency = "EUR".to_string();
        assert!(matches!(
            compute_variance(&order, None, &invoice),
            Err(MatchError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn swapped_documents_are_rejected() {
        let order = doc(DocumentKind::Order, "100", 1, &[]);
        let invoice = doc(DocumentKind::Invoice, "100", 6, &[]);
        assert!(matches!(
            compute_variance(&invoice, None, &order),
            Err(MatchError::InvalidRequest(_))
        ));
    }
}
