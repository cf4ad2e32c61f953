//! Readers for the raw transaction export and the two reference tables.
//!
//! The transaction export follows the Online Retail layout; both the
//! original and the "II" header spellings are accepted.

use std::io;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info};

use crate::types::{RejectionCounts, RowRejection, TransactionRecord};

// ---------------------------------------------------------------------------
// CSV row schemas
// ---------------------------------------------------------------------------

/// A single line of the transaction export, untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTransactionRow {
    #[serde(rename = "Invoice", alias = "InvoiceNo", alias = "invoice_id")]
    pub invoice: Option<String>,
    #[serde(rename = "Description", alias = "product_name")]
    pub description: Option<String>,
    #[serde(rename = "Quantity", alias = "quantity")]
    pub quantity: Option<String>,
    #[serde(rename = "InvoiceDate", alias = "timestamp")]
    pub invoice_date: Option<String>,
    #[serde(rename = "Price", alias = "UnitPrice", alias = "unit_price")]
    pub price: Option<String>,
    #[serde(rename = "Customer ID", alias = "CustomerID", alias = "customer_id")]
    pub customer_id: Option<String>,
    #[serde(rename = "Country", alias = "country")]
    pub country: Option<String>,
}

/// Country → region → continent reference row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CountryRef {
    pub country: String,
    pub region: String,
    pub continent: String,
}

/// Manual product → category mapping row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CategoryRef {
    pub product: String,
    pub category: String,
}

/// Column groups the export must carry; each entry lists accepted spellings.
const REQUIRED_COLUMNS: &[&[&str]] = &[
    &["Invoice", "InvoiceNo", "invoice_id"],
    &["Description", "product_name"],
    &["Quantity", "quantity"],
    &["InvoiceDate", "timestamp"],
    &["Price", "UnitPrice", "unit_price"],
    &["Customer ID", "CustomerID", "customer_id"],
];

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Convert one raw export row into a [`TransactionRecord`].
///
/// Only structural problems (missing invoice, unparsable numbers) are
/// rejected here; business filters live in the fact builder.
pub fn map_row(row: &RawTransactionRow) -> std::result::Result<TransactionRecord, RowRejection> {
    let invoice_id = non_blank(&row.invoice).ok_or(RowRejection::MissingInvoice)?;

    let quantity_raw = non_blank(&row.quantity).unwrap_or_default();
    let quantity: i64 = quantity_raw
        .parse()
        .map_err(|_| RowRejection::MalformedQuantity(quantity_raw.clone()))?;

    let price_raw = non_blank(&row.price).unwrap_or_default();
    let unit_price: f64 = price_raw
        .parse()
        .ok()
        .filter(|p: &f64| p.is_finite())
        .ok_or_else(|| RowRejection::MalformedPrice(price_raw.clone()))?;

    Ok(TransactionRecord {
        invoice_id,
        product_name: non_blank(&row.description),
        quantity,
        timestamp: non_blank(&row.invoice_date).unwrap_or_default(),
        unit_price,
        customer_id: non_blank(&row.customer_id),
        country: non_blank(&row.country),
    })
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

/// Parsed transaction export plus the rows that could not be parsed.
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub records: Vec<TransactionRecord>,
    pub rows_read: usize,
    pub rejections: RejectionCounts,
}

fn check_headers(headers: &csv::StringRecord) -> Result<()> {
    for spellings in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| spellings.contains(&h.trim())) {
            bail!(
                "transaction export is missing a required column (one of {})",
                spellings.join(", ")
            );
        }
    }
    Ok(())
}

/// Read the transaction export from any reader.
pub fn read_transactions_from<R: io::Read>(reader: R) -> Result<SourceBatch> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers().context("failed to read CSV header")?.clone();
    check_headers(&headers)?;

    let mut batch = SourceBatch::default();
    for (line_num, result) in rdr.deserialize::<RawTransactionRow>().enumerate() {
        // Header is line 1.
        let row = result.with_context(|| format!("CSV error at line {}", line_num + 2))?;
        batch.rows_read += 1;

        match map_row(&row) {
            Ok(record) => batch.records.push(record),
            Err(rejection) => {
                debug!(line = line_num + 2, reason = %rejection, "rejected row");
                batch.rejections.record(&rejection);
            }
        }
    }

    Ok(batch)
}

/// Read the transaction export from a CSV file.
pub fn read_transactions(path: &Path) -> Result<SourceBatch> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let batch = read_transactions_from(file)
        .with_context(|| format!("failed to read transactions from {}", path.display()))?;

    info!(
        rows = batch.rows_read,
        parsed = batch.records.len(),
        rejected = batch.rejections.total(),
        "read transaction export {}",
        path.display()
    );
    Ok(batch)
}

fn read_reference<T: DeserializeOwned, R: io::Read>(reader: R) -> Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (line_num, result) in rdr.deserialize::<T>().enumerate() {
        rows.push(result.with_context(|| format!("CSV error at line {}", line_num + 2))?);
    }
    Ok(rows)
}

/// Read the country reference table (`country,region,continent`).
pub fn read_countries_from<R: io::Read>(reader: R) -> Result<Vec<CountryRef>> {
    read_reference(reader)
}

/// Read the category reference table (`product,category`).
pub fn read_categories_from<R: io::Read>(reader: R) -> Result<Vec<CategoryRef>> {
    read_reference(reader)
}

/// Read a reference table from disk; `None` yields an empty table.
pub fn read_optional<T, F>(path: Option<&Path>, read: F) -> Result<Vec<T>>
where
    F: Fn(std::fs::File) -> Result<Vec<T>>,
{
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let rows = read(file).with_context(|| format!("failed to read {}", path.display()))?;
    info!(rows = rows.len(), "read reference table {}", path.display());
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn raw(quantity: &str, price: &str, customer: &str) -> RawTransactionRow {
        RawTransactionRow {
            invoice: Some("536365".to_string()),
            description: Some("WHITE HANGING HEART T-LIGHT HOLDER".to_string()),
            quantity: Some(quantity.to_string()),
            invoice_date: Some("2010-12-01 08:26:00".to_string()),
            price: Some(price.to_string()),
            customer_id: Some(customer.to_string()),
            country: Some("United Kingdom".to_string()),
        }
    }

    #[test]
    fn test_map_row_basic() {
        let rec = map_row(&raw("6", "2.55", "17850")).unwrap();
        assert_eq!(rec.invoice_id, "536365");
        assert_eq!(rec.quantity, 6);
        assert!((rec.unit_price - 2.55).abs() < 1e-9);
        assert_eq!(rec.customer_id.as_deref(), Some("17850"));
        assert_eq!(rec.timestamp, "2010-12-01 08:26:00");
    }

    #[test]
    fn test_map_row_blank_customer_is_none() {
        let rec = map_row(&raw("6", "2.55", "   ")).unwrap();
        assert_eq!(rec.customer_id, None);
    }

    #[test]
    fn test_map_row_negative_quantity_kept() {
        let rec = map_row(&raw("-12", "2.55", "17850")).unwrap();
        assert_eq!(rec.quantity, -12);
    }

    #[test]
    fn test_map_row_malformed_numbers() {
        assert_eq!(
            map_row(&raw("six", "2.55", "17850")),
            Err(RowRejection::MalformedQuantity("six".to_string()))
        );
        assert_eq!(
            map_row(&raw("6", "cheap", "17850")),
            Err(RowRejection::MalformedPrice("cheap".to_string()))
        );
        assert_eq!(
            map_row(&raw("6", "NaN", "17850")),
            Err(RowRejection::MalformedPrice("NaN".to_string()))
        );
    }

    #[test]
    fn test_map_row_missing_invoice() {
        let mut row = raw("6", "2.55", "17850");
        row.invoice = None;
        assert_eq!(map_row(&row), Err(RowRejection::MissingInvoice));
    }

    #[test]
    fn test_read_transactions_online_retail_headers() {
        let csv = "\
InvoiceNo,StockCode,Description,Quantity,InvoiceDate,UnitPrice,CustomerID,Country
536365,85123A,WHITE HANGING HEART T-LIGHT HOLDER,6,12/1/2010 8:26,2.55,17850.0,United Kingdom
536366,22633,HAND WARMER UNION JACK,six,12/1/2010 8:28,1.85,17850.0,United Kingdom
C536379,D,Discount,-1,12/1/2010 9:41,27.5,14527.0,United Kingdom
";
        let batch = read_transactions_from(csv.as_bytes()).unwrap();
        assert_eq!(batch.rows_read, 3);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.rejections.get("malformed_quantity"), 1);
        assert_eq!(batch.records[1].invoice_id, "C536379");
        assert_eq!(batch.records[1].quantity, -1);
    }

    #[test]
    fn test_read_transactions_online_retail_ii_headers() {
        let csv = "\
Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Customer ID,Country
489434,85048,15CM CHRISTMAS GLASS BALL 20 LIGHTS,12,2009-12-01 07:45:00,6.95,13085,United Kingdom
489435,22350,CAT BOWL ,12,2009-12-01 07:46:00,2.55,,United Kingdom
";
        let batch = read_transactions_from(csv.as_bytes()).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].customer_id.as_deref(), Some("13085"));
        assert_eq!(batch.records[1].customer_id, None);
        assert_eq!(batch.records[1].product_name.as_deref(), Some("CAT BOWL"));
    }

    #[test]
    fn test_read_transactions_missing_column_fails() {
        let csv = "Invoice,Description,Quantity,Price\n1,x,1,1.0\n";
        let err = read_transactions_from(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("InvoiceDate"));
    }

    #[test]
    fn test_read_transactions_without_customer_column_fails() {
        let csv = "\
Invoice,Description,Quantity,InvoiceDate,Price,Country
1,MUG,2,2010-12-01 08:26:00,2.50,France
2,PLATE,1,2010-12-02 09:00:00,4.00,France
";
        let err = read_transactions_from(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("CustomerID"));
    }

    #[test]
    fn test_read_transactions_without_description_column_fails() {
        let csv = "\
Invoice,Quantity,InvoiceDate,Price,Customer ID,Country
1,2,2010-12-01 08:26:00,2.50,17850,France
";
        let err = read_transactions_from(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("Description"));
    }

    #[test]
    fn test_read_transactions_ignores_extra_columns() {
        let csv = "\
Invoice,StockCode,Description,Quantity,InvoiceDate,Price,Customer ID,Country,Notes
1,85123A,MUG,2,2010-12-01 08:26:00,2.50,17850,France,gift
";
        let batch = read_transactions_from(csv.as_bytes()).unwrap();
        assert_eq!(batch.records.len(), 1);
    }

    #[test]
    fn test_read_reference_tables() {
        let countries = "country,region,continent\nMalta,Southern Europe,Europe\n";
        let rows = read_countries_from(countries.as_bytes()).unwrap();
        assert_eq!(
            rows,
            vec![CountryRef {
                country: "Malta".to_string(),
                region: "Southern Europe".to_string(),
                continent: "Europe".to_string(),
            }]
        );

        let categories = "product,category\nCat Bowl , Pets\n";
        let rows = read_categories_from(categories.as_bytes()).unwrap();
        assert_eq!(rows[0].product, "Cat Bowl");
        assert_eq!(rows[0].category, "Pets");
    }

    #[test]
    fn test_read_optional_none_is_empty() {
        let rows = read_optional(None, read_countries_from).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_read_transactions_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("online_retail.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "Invoice,Description,Quantity,InvoiceDate,Price,Customer ID,Country").unwrap();
        writeln!(f, "1,Mug,2,2011-01-05 10:00:00,3.0,12345,France").unwrap();
        drop(f);

        let batch = read_transactions(&path).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].country.as_deref(), Some("France"));

        assert!(read_transactions(&tmp.path().join("missing.csv")).is_err());
    }
}
