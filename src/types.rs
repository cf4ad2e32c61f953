//! Row types for the raw export and every table of the star schema.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// Transaction direction, derived from the sign of the quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Sale,
    Return,
}

impl TransactionType {
    /// Non-negative quantities are sales, negative ones are returns.
    pub fn from_quantity(quantity: i64) -> Self {
        if quantity >= 0 {
            TransactionType::Sale
        } else {
            TransactionType::Return
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TransactionType::Sale => "Sale",
            TransactionType::Return => "Return",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Sale" => Some(TransactionType::Sale),
            "Return" => Some(TransactionType::Return),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One line of the raw export after numeric fields have been parsed.
///
/// The timestamp stays a string: parsing it is the fact builder's job so a
/// malformed value rejects the row there instead of being defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub invoice_id: String,
    pub product_name: Option<String>,
    /// Signed; negative denotes a return.
    pub quantity: i64,
    pub timestamp: String,
    pub unit_price: f64,
    pub customer_id: Option<String>,
    pub country: Option<String>,
}

/// Canonical sales/returns fact row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesFact {
    pub invoice_id: String,
    pub customer_id: String,
    pub product_id: i64,
    pub product_name: String,
    pub invoice_date: NaiveDate,
    pub transaction_time: NaiveTime,
    pub transaction_type: TransactionType,
    pub quantity: i64,
    pub unit_price: f64,
    /// quantity × unit price (negative for returns).
    pub total_amount: f64,
    pub country: String,
}

impl SalesFact {
    pub fn is_sale(&self) -> bool {
        self.transaction_type == TransactionType::Sale
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDim {
    pub customer_id: String,
    pub country_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographyDim {
    pub country_id: i64,
    pub country_name: String,
    pub region: String,
    pub continent: String,
    pub customer_count: i64,
    /// `Yes` when the country has at least the significance threshold of
    /// distinct customers.
    #[serde(with = "yes_no")]
    pub market_significant: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDim {
    pub product_id: i64,
    pub product_name: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateDim {
    pub date: NaiveDate,
    pub day: u32,
    pub month: u32,
    pub year: i32,
    /// 1 = Monday … 7 = Sunday.
    pub day_of_week: u32,
    pub weekday_name: String,
    pub month_name: String,
    pub quarter: u32,
    /// e.g. `Q3 2011`.
    pub quarter_label: String,
}

impl DateDim {
    pub fn is_month_start(&self) -> bool {
        self.day == 1
    }
}

/// Retention count for one (country, cohort month, months since acquisition).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortRow {
    pub country_id: i64,
    pub cohort_month: NaiveDate,
    pub months_since_acquisition: i64,
    pub active_customers: i64,
    pub cohort_size: i64,
}

/// Where a customer stood some months after a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SegmentOutlook {
    /// The target month start (snapshot + offset months).
    pub snapshot_date: Option<NaiveDate>,
    pub rfm_segment: String,
    pub segment_priority: String,
}

/// Number of months looked ahead from each snapshot.
pub const LOOKAHEAD_MONTHS: usize = 4;

/// One customer's cumulative RFM standing at a month start.
#[derive(Debug, Clone, PartialEq)]
pub struct RfmSnapshot {
    pub customer_id: String,
    pub snapshot_date: NaiveDate,
    pub last_purchase_date: NaiveDate,
    /// Distinct invoices up to and including the snapshot date.
    pub frequency: i64,
    /// Cumulative revenue up to and including the snapshot date.
    pub monetary: f64,
    pub recency_days: i64,
    pub recency_score: u8,
    pub frequency_score: u8,
    pub monetary_score: u8,
    pub rfm_code: String,
    pub rfm_segment: String,
    pub segment_priority: String,
    /// Index 0 is one month ahead, index 3 four months ahead.
    pub outlook: [SegmentOutlook; LOOKAHEAD_MONTHS],
}

/// Flat rendition of [`RfmSnapshot`] for CSV export.
#[derive(Debug, Clone, Serialize)]
pub struct RfmSnapshotRecord<'a> {
    pub customer_id: &'a str,
    pub snapshot_date: NaiveDate,
    pub last_purchase_date: NaiveDate,
    pub frequency: i64,
    pub monetary: f64,
    pub recency_days: i64,
    pub recency_score: u8,
    pub frequency_score: u8,
    pub monetary_score: u8,
    pub rfm_code: &'a str,
    pub rfm_segment: &'a str,
    pub segment_priority: &'a str,
    pub month_1_snapshot_date: Option<NaiveDate>,
    pub month_1_rfm_segment: &'a str,
    pub month_1_segment_priority: &'a str,
    pub month_2_snapshot_date: Option<NaiveDate>,
    pub month_2_rfm_segment: &'a str,
    pub month_2_segment_priority: &'a str,
    pub month_3_snapshot_date: Option<NaiveDate>,
    pub month_3_rfm_segment: &'a str,
    pub month_3_segment_priority: &'a str,
    pub month_4_snapshot_date: Option<NaiveDate>,
    pub month_4_rfm_segment: &'a str,
    pub month_4_segment_priority: &'a str,
}

impl<'a> From<&'a RfmSnapshot> for RfmSnapshotRecord<'a> {
    fn from(s: &'a RfmSnapshot) -> Self {
        let [m1, m2, m3, m4] = &s.outlook;
        Self {
            customer_id: &s.customer_id,
            snapshot_date: s.snapshot_date,
            last_purchase_date: s.last_purchase_date,
            frequency: s.frequency,
            monetary: s.monetary,
            recency_days: s.recency_days,
            recency_score: s.recency_score,
            frequency_score: s.frequency_score,
            monetary_score: s.monetary_score,
            rfm_code: &s.rfm_code,
            rfm_segment: &s.rfm_segment,
            segment_priority: &s.segment_priority,
            month_1_snapshot_date: m1.snapshot_date,
            month_1_rfm_segment: &m1.rfm_segment,
            month_1_segment_priority: &m1.segment_priority,
            month_2_snapshot_date: m2.snapshot_date,
            month_2_rfm_segment: &m2.rfm_segment,
            month_2_segment_priority: &m2.segment_priority,
            month_3_snapshot_date: m3.snapshot_date,
            month_3_rfm_segment: &m3.rfm_segment,
            month_3_segment_priority: &m3.segment_priority,
            month_4_snapshot_date: m4.snapshot_date,
            month_4_rfm_segment: &m4.rfm_segment,
            month_4_segment_priority: &m4.segment_priority,
        }
    }
}

/// Every table the pipeline materializes.
#[derive(Debug, Clone, Default)]
pub struct StarSchema {
    pub facts: Vec<SalesFact>,
    pub customers: Vec<CustomerDim>,
    pub geography: Vec<GeographyDim>,
    pub products: Vec<ProductDim>,
    pub dates: Vec<DateDim>,
    pub cohorts: Vec<CohortRow>,
    pub rfm: Vec<RfmSnapshot>,
}

/// Why a raw row never made it into the fact table.
///
/// These are data-quality filters, not failures: they are counted and
/// logged, never propagated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowRejection {
    #[error("missing invoice id")]
    MissingInvoice,
    #[error("malformed quantity '{0}'")]
    MalformedQuantity(String),
    #[error("malformed unit price '{0}'")]
    MalformedPrice(String),
    #[error("non-positive unit price {0}")]
    NonPositivePrice(f64),
    #[error("missing customer id")]
    MissingCustomer,
    #[error("missing product name")]
    MissingProduct,
    #[error("malformed timestamp '{0}'")]
    MalformedTimestamp(String),
    #[error("return exceeds quantity sold to customer {customer_id} for '{product_name}'")]
    IneligibleReturn {
        customer_id: String,
        product_name: String,
    },
}

impl RowRejection {
    /// Stable key used when counting rejections.
    pub fn kind(&self) -> &'static str {
        match self {
            RowRejection::MissingInvoice => "missing_invoice",
            RowRejection::MalformedQuantity(_) => "malformed_quantity",
            RowRejection::MalformedPrice(_) => "malformed_price",
            RowRejection::NonPositivePrice(_) => "non_positive_price",
            RowRejection::MissingCustomer => "missing_customer",
            RowRejection::MissingProduct => "missing_product",
            RowRejection::MalformedTimestamp(_) => "malformed_timestamp",
            RowRejection::IneligibleReturn { .. } => "ineligible_return",
        }
    }
}

/// Rejection tallies keyed by [`RowRejection::kind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RejectionCounts {
    counts: std::collections::BTreeMap<&'static str, usize>,
}

impl RejectionCounts {
    pub fn record(&mut self, rejection: &RowRejection) {
        *self.counts.entry(rejection.kind()).or_default() += 1;
    }

    pub fn get(&self, kind: &str) -> usize {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn merge(&mut self, other: &RejectionCounts) {
        for (kind, n) in &other.counts {
            *self.counts.entry(kind).or_default() += n;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.counts.iter().map(|(k, v)| (*k, *v))
    }
}

/// Serialize a bool as `Yes` / `No`.
pub mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn label(value: bool) -> &'static str {
        if value {
            "Yes"
        } else {
            "No"
        }
    }

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(label(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "Yes" => Ok(true),
            "No" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected Yes or No, got '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_from_quantity() {
        assert_eq!(TransactionType::from_quantity(6), TransactionType::Sale);
        assert_eq!(TransactionType::from_quantity(0), TransactionType::Sale);
        assert_eq!(TransactionType::from_quantity(-1), TransactionType::Return);
    }

    #[test]
    fn test_transaction_type_labels() {
        assert_eq!(TransactionType::Sale.to_string(), "Sale");
        assert_eq!(
            TransactionType::from_label("Return"),
            Some(TransactionType::Return)
        );
        assert_eq!(TransactionType::from_label("refund"), None);
    }

    #[test]
    fn test_rejection_counts() {
        let mut counts = RejectionCounts::default();
        counts.record(&RowRejection::MissingCustomer);
        counts.record(&RowRejection::MissingCustomer);
        counts.record(&RowRejection::NonPositivePrice(0.0));

        let mut other = RejectionCounts::default();
        other.record(&RowRejection::MissingCustomer);
        counts.merge(&other);

        assert_eq!(counts.get("missing_customer"), 3);
        assert_eq!(counts.get("non_positive_price"), 1);
        assert_eq!(counts.get("malformed_timestamp"), 0);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_rejection_messages() {
        let r = RowRejection::MalformedTimestamp("yesterday".to_string());
        assert_eq!(r.to_string(), "malformed timestamp 'yesterday'");
        assert_eq!(r.kind(), "malformed_timestamp");
    }

    #[test]
    fn test_geography_serializes_yes_no() {
        let row = GeographyDim {
            country_id: 3,
            country_name: "Malta".to_string(),
            region: "Southern Europe".to_string(),
            continent: "Europe".to_string(),
            customer_count: 5,
            market_significant: false,
        };
        let json = serde_json::to_string(&row).unwrap();
        assert!(json.contains(r#""market_significant":"No""#));

        let back: GeographyDim = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn test_rfm_record_flattens_outlook() {
        let date = NaiveDate::from_ymd_opt(2011, 1, 1).unwrap();
        let mut snap = RfmSnapshot {
            customer_id: "12346".to_string(),
            snapshot_date: date,
            last_purchase_date: date,
            frequency: 1,
            monetary: 10.0,
            recency_days: 0,
            recency_score: 5,
            frequency_score: 1,
            monetary_score: 1,
            rfm_code: "511".to_string(),
            rfm_segment: "New Customers".to_string(),
            segment_priority: "Growth".to_string(),
            outlook: Default::default(),
        };
        snap.outlook[1].rfm_segment = "Dropped Off".to_string();

        let record = RfmSnapshotRecord::from(&snap);
        assert_eq!(record.month_2_rfm_segment, "Dropped Off");
        assert_eq!(record.month_1_rfm_segment, "");
        assert_eq!(record.rfm_code, "511");
    }
}
