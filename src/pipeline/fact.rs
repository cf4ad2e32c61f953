//! Fact builder: raw transaction rows → `fact_sales`.
//!
//! Filters run in this order:
//! 1. Row-level cleaning (non-positive price, missing customer, missing
//!    product name, malformed timestamp).
//! 2. Two-pass returns validation: aggregate sold and returned quantity
//!    per (customer, product) over the whole dataset, then keep a pair's
//!    Return rows only when returned ≤ sold. A pair is admitted or excluded
//!    as a whole.
//!
//! Product ids are assigned last, by rank of the normalized product name
//! among the rows that survived, so the ids are dense over the fact table.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDateTime};
use tracing::{debug, info};

use crate::types::{RejectionCounts, RowRejection, SalesFact, TransactionRecord, TransactionType};

/// Country recorded for rows whose export line carried none.
pub const UNSPECIFIED_COUNTRY: &str = "Unspecified";

/// Timestamp layouts seen in retail exports, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
];

/// Counts from one fact build.
#[derive(Debug, Clone, Default)]
pub struct FactStats {
    pub input_rows: usize,
    pub sales: usize,
    pub returns_kept: usize,
    pub returns_dropped: usize,
    pub distinct_products: usize,
    pub distinct_customers: usize,
    pub rejections: RejectionCounts,
}

/// A row that passed cleaning but has no product id yet.
#[derive(Debug, Clone)]
struct CleanRow {
    invoice_id: String,
    customer_id: String,
    product_name: String,
    timestamp: NaiveDateTime,
    quantity: i64,
    unit_price: f64,
    country: String,
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Trim a customer id and undo float rendering (`17850.0` → `17850`).
pub fn normalize_customer_id(raw: &str) -> Option<String> {
    let id = raw.trim();
    if id.is_empty() {
        return None;
    }
    if let Some((int, frac)) = id.split_once('.') {
        if !int.is_empty()
            && int.chars().all(|c| c.is_ascii_digit())
            && frac.chars().all(|c| c == '0')
        {
            return Some(int.to_string());
        }
    }
    Some(id.to_string())
}

/// Collapse whitespace and apply initcap casing: the first letter of every
/// alphanumeric run is upper-cased, the rest lower-cased.
pub fn normalize_product_name(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(collapsed.len());
    let mut in_word = false;
    for c in collapsed.chars() {
        if c.is_alphanumeric() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    Some(out)
}

/// Parse an export timestamp. Never falls back to a default date.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, RowRejection> {
    let value = raw.trim();
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(ts);
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_local())
        .map_err(|_| RowRejection::MalformedTimestamp(value.to_string()))
}

fn clean_row(rec: &TransactionRecord) -> Result<CleanRow, RowRejection> {
    if rec.unit_price <= 0.0 {
        return Err(RowRejection::NonPositivePrice(rec.unit_price));
    }
    let customer_id = rec
        .customer_id
        .as_deref()
        .and_then(normalize_customer_id)
        .ok_or(RowRejection::MissingCustomer)?;
    let product_name = rec
        .product_name
        .as_deref()
        .and_then(normalize_product_name)
        .ok_or(RowRejection::MissingProduct)?;
    let timestamp = parse_timestamp(&rec.timestamp)?;

    Ok(CleanRow {
        invoice_id: rec.invoice_id.clone(),
        customer_id,
        product_name,
        timestamp,
        quantity: rec.quantity,
        unit_price: rec.unit_price,
        country: rec
            .country
            .clone()
            .unwrap_or_else(|| UNSPECIFIED_COUNTRY.to_string()),
    })
}

// ---------------------------------------------------------------------------
// Returns validation
// ---------------------------------------------------------------------------

/// Sold and returned quantity for one (customer, product) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReturnLedger {
    pub sold: i64,
    pub returned: i64,
}

impl ReturnLedger {
    pub fn returns_eligible(&self) -> bool {
        self.returned <= self.sold
    }
}

/// First pass: aggregate quantities per (customer, product name).
fn aggregate_ledgers(rows: &[CleanRow]) -> HashMap<(&str, &str), ReturnLedger> {
    let mut ledgers: HashMap<(&str, &str), ReturnLedger> = HashMap::new();
    for row in rows {
        let entry = ledgers
            .entry((row.customer_id.as_str(), row.product_name.as_str()))
            .or_default();
        if row.quantity >= 0 {
            entry.sold += row.quantity;
        } else {
            entry.returned += -row.quantity;
        }
    }
    ledgers
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Build the sales fact table from parsed export rows.
pub fn build_facts(records: &[TransactionRecord]) -> (Vec<SalesFact>, FactStats) {
    let mut stats = FactStats {
        input_rows: records.len(),
        ..Default::default()
    };

    let mut clean = Vec::with_capacity(records.len());
    for rec in records {
        match clean_row(rec) {
            Ok(row) => clean.push(row),
            Err(rejection) => {
                debug!(invoice = %rec.invoice_id, reason = %rejection, "rejected row");
                stats.rejections.record(&rejection);
            }
        }
    }

    // Second pass: set-membership filter on the fully aggregated ledgers.
    let kept: Vec<CleanRow> = {
        let ledgers = aggregate_ledgers(&clean);
        let eligible = |row: &CleanRow| {
            row.quantity >= 0
                || ledgers
                    .get(&(row.customer_id.as_str(), row.product_name.as_str()))
                    .is_some_and(ReturnLedger::returns_eligible)
        };
        let (kept, dropped): (Vec<&CleanRow>, Vec<&CleanRow>) =
            clean.iter().partition(|row| eligible(row));
        for row in dropped {
            stats.returns_dropped += 1;
            stats.rejections.record(&RowRejection::IneligibleReturn {
                customer_id: row.customer_id.clone(),
                product_name: row.product_name.clone(),
            });
        }
        kept.into_iter().cloned().collect()
    };

    let names: BTreeSet<&str> = kept.iter().map(|r| r.product_name.as_str()).collect();
    let product_ids: HashMap<&str, i64> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (*name, i as i64 + 1))
        .collect();
    stats.distinct_products = product_ids.len();

    let mut facts: Vec<SalesFact> = kept
        .iter()
        .map(|row| {
            let transaction_type = TransactionType::from_quantity(row.quantity);
            SalesFact {
                invoice_id: row.invoice_id.clone(),
                customer_id: row.customer_id.clone(),
                product_id: product_ids[row.product_name.as_str()],
                product_name: row.product_name.clone(),
                invoice_date: row.timestamp.date(),
                transaction_time: row.timestamp.time(),
                transaction_type,
                quantity: row.quantity,
                unit_price: row.unit_price,
                total_amount: row.quantity as f64 * row.unit_price,
                country: row.country.clone(),
            }
        })
        .collect();
    facts.sort_by(|a, b| {
        (a.invoice_date, a.transaction_time, &a.invoice_id, a.product_id).cmp(&(
            b.invoice_date,
            b.transaction_time,
            &b.invoice_id,
            b.product_id,
        ))
    });

    stats.sales = facts.iter().filter(|f| f.is_sale()).count();
    stats.returns_kept = facts.len() - stats.sales;
    stats.distinct_customers = facts
        .iter()
        .map(|f| f.customer_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    info!(
        input = stats.input_rows,
        facts = facts.len(),
        sales = stats.sales,
        returns_kept = stats.returns_kept,
        returns_dropped = stats.returns_dropped,
        rejected = stats.rejections.total(),
        "built sales fact"
    );

    (facts, stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rec(invoice: &str, customer: Option<&str>, product: &str, qty: i64, price: f64) -> TransactionRecord {
        TransactionRecord {
            invoice_id: invoice.to_string(),
            product_name: Some(product.to_string()),
            quantity: qty,
            timestamp: "2011-01-10 10:00:00".to_string(),
            unit_price: price,
            customer_id: customer.map(|c| c.to_string()),
            country: Some("France".to_string()),
        }
    }

    // -- normalization --------------------------------------------------------

    #[test]
    fn test_normalize_customer_id() {
        assert_eq!(normalize_customer_id(" 17850 "), Some("17850".to_string()));
        assert_eq!(normalize_customer_id("17850.0"), Some("17850".to_string()));
        assert_eq!(normalize_customer_id("17850.5"), Some("17850.5".to_string()));
        assert_eq!(normalize_customer_id("   "), None);
    }

    #[test]
    fn test_normalize_product_name_initcap() {
        assert_eq!(
            normalize_product_name("  WHITE   HANGING HEART T-LIGHT HOLDER "),
            Some("White Hanging Heart T-Light Holder".to_string())
        );
        assert_eq!(
            normalize_product_name("set of 3 cake tins"),
            Some("Set Of 3 Cake Tins".to_string())
        );
        assert_eq!(normalize_product_name(" \t "), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2010, 12, 1)
            .unwrap()
            .and_hms_opt(8, 26, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2010-12-01 08:26:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2010-12-01 08:26").unwrap(), expected);
        assert_eq!(parse_timestamp("12/1/2010 8:26").unwrap(), expected);
        assert_eq!(parse_timestamp("2010-12-01T08:26:00+00:00").unwrap(), expected);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert_eq!(
            parse_timestamp("31/31/2010 8:26"),
            Err(RowRejection::MalformedTimestamp("31/31/2010 8:26".to_string()))
        );
        assert!(parse_timestamp("").is_err());
    }

    // -- row filters ----------------------------------------------------------

    #[test]
    fn test_rejects_non_positive_price_and_missing_customer() {
        let records = vec![
            rec("1", Some("100"), "Mug", 1, 2.0),
            rec("2", Some("100"), "Mug", 1, 0.0),
            rec("3", Some("100"), "Mug", 1, -5.0),
            rec("4", None, "Mug", 1, 2.0),
            rec("5", Some(" "), "Mug", 1, 2.0),
        ];
        let (facts, stats) = build_facts(&records);
        assert_eq!(facts.len(), 1);
        assert_eq!(stats.rejections.get("non_positive_price"), 2);
        assert_eq!(stats.rejections.get("missing_customer"), 2);
        for f in &facts {
            assert!(f.unit_price > 0.0);
            assert!(!f.customer_id.is_empty());
        }
    }

    #[test]
    fn test_rejects_malformed_timestamp() {
        let mut bad = rec("1", Some("100"), "Mug", 1, 2.0);
        bad.timestamp = "not a date".to_string();
        let (facts, stats) = build_facts(&[bad]);
        assert!(facts.is_empty());
        assert_eq!(stats.rejections.get("malformed_timestamp"), 1);
    }

    #[test]
    fn test_classifies_and_computes_totals() {
        let records = vec![
            rec("1", Some("100"), "Mug", 4, 2.5),
            rec("C2", Some("100"), "Mug", -1, 2.5),
        ];
        let (facts, stats) = build_facts(&records);
        assert_eq!(stats.sales, 1);
        assert_eq!(stats.returns_kept, 1);

        let sale = facts.iter().find(|f| f.invoice_id == "1").unwrap();
        assert_eq!(sale.transaction_type, TransactionType::Sale);
        assert!((sale.total_amount - 10.0).abs() < 1e-9);

        let ret = facts.iter().find(|f| f.invoice_id == "C2").unwrap();
        assert_eq!(ret.transaction_type, TransactionType::Return);
        assert!((ret.total_amount + 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_product_ids_follow_name_order() {
        let records = vec![
            rec("1", Some("100"), "ZEBRA MUG", 1, 1.0),
            rec("2", Some("100"), "apple tray", 1, 1.0),
            rec("3", Some("101"), "Apple Tray", 1, 1.0),
        ];
        let (facts, stats) = build_facts(&records);
        assert_eq!(stats.distinct_products, 2);
        for f in &facts {
            match f.product_name.as_str() {
                "Apple Tray" => assert_eq!(f.product_id, 1),
                "Zebra Mug" => assert_eq!(f.product_id, 2),
                other => panic!("unexpected product {}", other),
            }
        }
    }

    // -- returns validation ---------------------------------------------------

    #[test]
    fn test_excess_returns_dropped_entirely() {
        // Customer 100 bought 5 mugs but returned 3 + 4 = 7: both returns go.
        let records = vec![
            rec("1", Some("100"), "Mug", 5, 2.0),
            rec("C2", Some("100"), "Mug", -3, 2.0),
            rec("C3", Some("100"), "Mug", -4, 2.0),
        ];
        let (facts, stats) = build_facts(&records);
        assert_eq!(facts.len(), 1);
        assert!(facts[0].is_sale());
        assert_eq!(stats.returns_dropped, 2);
        assert_eq!(stats.rejections.get("ineligible_return"), 2);
    }

    #[test]
    fn test_returns_within_sold_quantity_kept() {
        let records = vec![
            rec("1", Some("100"), "Mug", 5, 2.0),
            rec("C2", Some("100"), "Mug", -2, 2.0),
            rec("C3", Some("100"), "Mug", -3, 2.0),
        ];
        let (facts, stats) = build_facts(&records);
        assert_eq!(facts.len(), 3);
        assert_eq!(stats.returns_kept, 2);
        assert_eq!(stats.returns_dropped, 0);
    }

    #[test]
    fn test_returns_validated_per_customer_and_product() {
        let records = vec![
            rec("1", Some("100"), "Mug", 5, 2.0),
            // Other customer never bought a mug.
            rec("C2", Some("200"), "Mug", -1, 2.0),
            // Same customer never bought a tray.
            rec("C3", Some("100"), "Tray", -1, 2.0),
        ];
        let (facts, stats) = build_facts(&records);
        assert_eq!(facts.len(), 1);
        assert_eq!(stats.returns_dropped, 2);
    }

    #[test]
    fn test_sales_pass_unconditionally() {
        let records: Vec<_> = (0..10)
            .map(|i| rec(&i.to_string(), Some("100"), "Mug", 1, 1.0))
            .collect();
        let (facts, stats) = build_facts(&records);
        assert_eq!(facts.len(), 10);
        assert_eq!(stats.sales, 10);
    }

    #[test]
    fn test_missing_country_defaults() {
        let mut r = rec("1", Some("100"), "Mug", 1, 1.0);
        r.country = None;
        let (facts, _) = build_facts(&[r]);
        assert_eq!(facts[0].country, UNSPECIFIED_COUNTRY);
    }
}
