use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Statement};
use tracing::debug;

use crate::types::{
    CohortRow, CustomerDim, DateDim, GeographyDim, ProductDim, RfmSnapshot, SalesFact,
    SegmentOutlook, StarSchema, TransactionType,
};

use super::schema::{self, TableDef};

/// Abstraction over where the star schema is materialized.
///
/// Every `replace_*` call drops and rebuilds its table inside a single
/// transaction, so a failed stage leaves the previous table untouched.
pub trait StarStore {
    fn init(&self) -> Result<()>;
    fn replace_facts(&self, rows: &[SalesFact]) -> Result<()>;
    fn replace_customers(&self, rows: &[CustomerDim]) -> Result<()>;
    fn replace_geography(&self, rows: &[GeographyDim]) -> Result<()>;
    fn replace_products(&self, rows: &[ProductDim]) -> Result<()>;
    fn replace_dates(&self, rows: &[DateDim]) -> Result<()>;
    fn replace_cohorts(&self, rows: &[CohortRow]) -> Result<()>;
    fn replace_rfm(&self, rows: &[RfmSnapshot]) -> Result<()>;
    fn load_facts(&self) -> Result<Vec<SalesFact>>;
    fn load_geography(&self) -> Result<Vec<GeographyDim>>;
    fn load_cohorts(&self) -> Result<Vec<CohortRow>>;
    fn load_rfm(&self) -> Result<Vec<RfmSnapshot>>;
    fn count_rows(&self, table: &str) -> Result<usize>;

    /// Write every table of a built schema.
    fn write_schema(&self, star: &StarSchema) -> Result<()> {
        self.replace_facts(&star.facts)?;
        self.replace_customers(&star.customers)?;
        self.replace_geography(&star.geography)?;
        self.replace_products(&star.products)?;
        self.replace_dates(&star.dates)?;
        self.replace_cohorts(&star.cohorts)?;
        self.replace_rfm(&star.rfm)?;
        Ok(())
    }
}

/// SQLite-backed implementation.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a file-backed database.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Drop, recreate and fill one table in a single transaction.
    fn rebuild<T>(
        &self,
        table: &TableDef,
        rows: &[T],
        bind: impl Fn(&mut Statement<'_>, &T) -> rusqlite::Result<usize>,
    ) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", table.name))?;
        tx.execute_batch(table.create)?;
        {
            let mut stmt = tx.prepare_cached(table.insert)?;
            for row in rows {
                bind(&mut stmt, row)
                    .with_context(|| format!("failed to insert into {}", table.name))?;
            }
        }
        tx.commit()
            .with_context(|| format!("failed to commit {}", table.name))?;
        debug!(table = table.name, rows = rows.len(), "rebuilt table");
        Ok(())
    }
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn map_fact(row: &Row<'_>) -> rusqlite::Result<SalesFact> {
    let kind: String = row.get(6)?;
    let transaction_type = TransactionType::from_label(&kind)
        .ok_or_else(|| conversion_error(6, format!("unknown transaction type '{}'", kind)))?;
    Ok(SalesFact {
        invoice_id: row.get(0)?,
        customer_id: row.get(1)?,
        product_id: row.get(2)?,
        product_name: row.get(3)?,
        invoice_date: row.get(4)?,
        transaction_time: row.get(5)?,
        transaction_type,
        quantity: row.get(7)?,
        unit_price: row.get(8)?,
        total_amount: row.get(9)?,
        country: row.get(10)?,
    })
}

fn map_rfm(row: &Row<'_>) -> rusqlite::Result<RfmSnapshot> {
    let outlook_at = |base: usize| -> rusqlite::Result<SegmentOutlook> {
        Ok(SegmentOutlook {
            snapshot_date: row.get(base)?,
            rfm_segment: row.get(base + 1)?,
            segment_priority: row.get(base + 2)?,
        })
    };
    Ok(RfmSnapshot {
        customer_id: row.get(0)?,
        snapshot_date: row.get(1)?,
        last_purchase_date: row.get(2)?,
        frequency: row.get(3)?,
        monetary: row.get(4)?,
        recency_days: row.get(5)?,
        recency_score: row.get(6)?,
        frequency_score: row.get(7)?,
        monetary_score: row.get(8)?,
        rfm_code: row.get(9)?,
        rfm_segment: row.get(10)?,
        segment_priority: row.get(11)?,
        outlook: [
            outlook_at(12)?,
            outlook_at(15)?,
            outlook_at(18)?,
            outlook_at(21)?,
        ],
    })
}

impl StarStore for SqliteStore {
    fn init(&self) -> Result<()> {
        for table in &schema::ALL_TABLES {
            self.conn
                .execute_batch(table.create)
                .with_context(|| format!("failed to create {}", table.name))?;
        }
        Ok(())
    }

    fn replace_facts(&self, rows: &[SalesFact]) -> Result<()> {
        self.rebuild(&schema::FACT_SALES, rows, |stmt, f| {
            stmt.execute(rusqlite::params![
                f.invoice_id,
                f.customer_id,
                f.product_id,
                f.product_name,
                f.invoice_date,
                f.transaction_time,
                f.transaction_type.label(),
                f.quantity,
                f.unit_price,
                f.total_amount,
                f.country,
            ])
        })
    }

    fn replace_customers(&self, rows: &[CustomerDim]) -> Result<()> {
        self.rebuild(&schema::DIM_CUSTOMER, rows, |stmt, c| {
            stmt.execute(rusqlite::params![c.customer_id, c.country_id])
        })
    }

    fn replace_geography(&self, rows: &[GeographyDim]) -> Result<()> {
        self.rebuild(&schema::DIM_GEOGRAPHY, rows, |stmt, g| {
            stmt.execute(rusqlite::params![
                g.country_id,
                g.country_name,
                g.region,
                g.continent,
                g.customer_count,
                crate::types::yes_no::label(g.market_significant),
            ])
        })
    }

    fn replace_products(&self, rows: &[ProductDim]) -> Result<()> {
        self.rebuild(&schema::DIM_PRODUCT, rows, |stmt, p| {
            stmt.execute(rusqlite::params![p.product_id, p.product_name, p.category])
        })
    }

    fn replace_dates(&self, rows: &[DateDim]) -> Result<()> {
        self.rebuild(&schema::DIM_DATE, rows, |stmt, d| {
            stmt.execute(rusqlite::params![
                d.date,
                d.day,
                d.month,
                d.year,
                d.day_of_week,
                d.weekday_name,
                d.month_name,
                d.quarter,
                d.quarter_label,
            ])
        })
    }

    fn replace_cohorts(&self, rows: &[CohortRow]) -> Result<()> {
        self.rebuild(&schema::COHORT_RETENTION, rows, |stmt, c| {
            stmt.execute(rusqlite::params![
                c.country_id,
                c.cohort_month,
                c.months_since_acquisition,
                c.active_customers,
                c.cohort_size,
            ])
        })
    }

    fn replace_rfm(&self, rows: &[RfmSnapshot]) -> Result<()> {
        self.rebuild(&schema::RFM_SNAPSHOT, rows, |stmt, s| {
            let [m1, m2, m3, m4] = &s.outlook;
            stmt.execute(rusqlite::params![
                s.customer_id,
                s.snapshot_date,
                s.last_purchase_date,
                s.frequency,
                s.monetary,
                s.recency_days,
                s.recency_score,
                s.frequency_score,
                s.monetary_score,
                s.rfm_code,
                s.rfm_segment,
                s.segment_priority,
                m1.snapshot_date,
                m1.rfm_segment,
                m1.segment_priority,
                m2.snapshot_date,
                m2.rfm_segment,
                m2.segment_priority,
                m3.snapshot_date,
                m3.rfm_segment,
                m3.segment_priority,
                m4.snapshot_date,
                m4.rfm_segment,
                m4.segment_priority,
            ])
        })
    }

    fn load_facts(&self) -> Result<Vec<SalesFact>> {
        let mut stmt = self.conn.prepare(schema::LOAD_FACTS)?;
        let rows = stmt
            .query_map([], map_fact)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_geography(&self) -> Result<Vec<GeographyDim>> {
        let mut stmt = self.conn.prepare(schema::LOAD_GEOGRAPHY)?;
        let rows = stmt
            .query_map([], |row| {
                let flag: String = row.get(5)?;
                Ok(GeographyDim {
                    country_id: row.get(0)?,
                    country_name: row.get(1)?,
                    region: row.get(2)?,
                    continent: row.get(3)?,
                    customer_count: row.get(4)?,
                    market_significant: flag == "Yes",
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_cohorts(&self) -> Result<Vec<CohortRow>> {
        let mut stmt = self.conn.prepare(schema::LOAD_COHORTS)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CohortRow {
                    country_id: row.get(0)?,
                    cohort_month: row.get(1)?,
                    months_since_acquisition: row.get(2)?,
                    active_customers: row.get(3)?,
                    cohort_size: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_rfm(&self) -> Result<Vec<RfmSnapshot>> {
        let mut stmt = self.conn.prepare(schema::LOAD_RFM)?;
        let rows = stmt
            .query_map([], map_rfm)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn count_rows(&self, table: &str) -> Result<usize> {
        if !schema::ALL_TABLES.iter().any(|t| t.name == table) {
            anyhow::bail!("unknown table '{}'", table);
        }
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn setup() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.init().unwrap();
        store
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_fact(invoice: &str, quantity: i64) -> SalesFact {
        SalesFact {
            invoice_id: invoice.to_string(),
            customer_id: "17850".to_string(),
            product_id: 1,
            product_name: "White Hanging Heart T-Light Holder".to_string(),
            invoice_date: date(2010, 12, 1),
            transaction_time: NaiveTime::from_hms_opt(8, 26, 0).unwrap(),
            transaction_type: TransactionType::from_quantity(quantity),
            quantity,
            unit_price: 2.55,
            total_amount: quantity as f64 * 2.55,
            country: "United Kingdom".to_string(),
        }
    }

    fn sample_snapshot(customer: &str, snapshot: NaiveDate) -> RfmSnapshot {
        RfmSnapshot {
            customer_id: customer.to_string(),
            snapshot_date: snapshot,
            last_purchase_date: date(2010, 12, 1),
            frequency: 3,
            monetary: 400.0,
            recency_days: 31,
            recency_score: 4,
            frequency_score: 3,
            monetary_score: 3,
            rfm_code: "433".to_string(),
            rfm_segment: "Loyal Customers".to_string(),
            segment_priority: "High Value".to_string(),
            outlook: [
                SegmentOutlook {
                    snapshot_date: Some(date(2011, 2, 1)),
                    rfm_segment: "Loyal Customers".to_string(),
                    segment_priority: "High Value".to_string(),
                },
                SegmentOutlook {
                    snapshot_date: Some(date(2011, 3, 1)),
                    rfm_segment: "Dropped Off".to_string(),
                    segment_priority: "Dropped Off".to_string(),
                },
                SegmentOutlook {
                    snapshot_date: None,
                    rfm_segment: "Dropped Off".to_string(),
                    segment_priority: "Dropped Off".to_string(),
                },
                SegmentOutlook::default(),
            ],
        }
    }

    #[test]
    fn test_init_creates_all_tables() {
        let store = setup();
        for table in &schema::ALL_TABLES {
            assert_eq!(store.count_rows(table.name).unwrap(), 0);
        }
    }

    #[test]
    fn test_count_rows_rejects_unknown_table() {
        let store = setup();
        assert!(store.count_rows("sqlite_master; DROP TABLE fact_sales").is_err());
    }

    #[test]
    fn test_facts_roundtrip() {
        let store = setup();
        let facts = vec![sample_fact("536365", 6), sample_fact("C536379", -2)];
        store.replace_facts(&facts).unwrap();

        let loaded = store.load_facts().unwrap();
        assert_eq!(loaded.len(), 2);
        let ret = loaded.iter().find(|f| f.invoice_id == "C536379").unwrap();
        assert_eq!(ret.transaction_type, TransactionType::Return);
        assert_eq!(ret.transaction_time, NaiveTime::from_hms_opt(8, 26, 0).unwrap());
        assert_eq!(ret.invoice_date, date(2010, 12, 1));
    }

    #[test]
    fn test_replace_drops_previous_rows() {
        let store = setup();
        store
            .replace_facts(&[sample_fact("1", 1), sample_fact("2", 1)])
            .unwrap();
        store.replace_facts(&[sample_fact("3", 1)]).unwrap();

        let loaded = store.load_facts().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].invoice_id, "3");
    }

    #[test]
    fn test_failed_replace_keeps_previous_table() {
        let store = setup();
        store.replace_facts(&[sample_fact("1", 1)]).unwrap();

        // unit_price CHECK constraint rejects the second row mid-transaction.
        let mut bad = sample_fact("2", 1);
        bad.unit_price = 0.0;
        assert!(store.replace_facts(&[sample_fact("3", 1), bad]).is_err());

        let loaded = store.load_facts().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].invoice_id, "1");
    }

    #[test]
    fn test_geography_roundtrip() {
        let store = setup();
        let rows = vec![GeographyDim {
            country_id: 1,
            country_name: "Malta".to_string(),
            region: "Southern Europe".to_string(),
            continent: "Europe".to_string(),
            customer_count: 5,
            market_significant: false,
        }];
        store.replace_geography(&rows).unwrap();
        assert_eq!(store.load_geography().unwrap(), rows);
    }

    #[test]
    fn test_cohorts_roundtrip() {
        let store = setup();
        let rows = vec![
            CohortRow {
                country_id: 1,
                cohort_month: date(2010, 12, 1),
                months_since_acquisition: 0,
                active_customers: 10,
                cohort_size: 10,
            },
            CohortRow {
                country_id: 1,
                cohort_month: date(2010, 12, 1),
                months_since_acquisition: 1,
                active_customers: 4,
                cohort_size: 10,
            },
        ];
        store.replace_cohorts(&rows).unwrap();
        assert_eq!(store.load_cohorts().unwrap(), rows);
    }

    #[test]
    fn test_rfm_roundtrip_with_outlook() {
        let store = setup();
        let snap = sample_snapshot("17850", date(2011, 1, 1));
        store.replace_rfm(std::slice::from_ref(&snap)).unwrap();

        let loaded = store.load_rfm().unwrap();
        assert_eq!(loaded, vec![snap]);
    }

    #[test]
    fn test_write_schema_populates_every_table() {
        let store = setup();
        let star = StarSchema {
            facts: vec![sample_fact("1", 1)],
            customers: vec![CustomerDim {
                customer_id: "17850".to_string(),
                country_id: 1,
            }],
            products: vec![ProductDim {
                product_id: 1,
                product_name: "Mug".to_string(),
                category: "Uncategorised".to_string(),
            }],
            rfm: vec![sample_snapshot("17850", date(2011, 1, 1))],
            ..Default::default()
        };
        store.write_schema(&star).unwrap();

        assert_eq!(store.count_rows("fact_sales").unwrap(), 1);
        assert_eq!(store.count_rows("dim_customer").unwrap(), 1);
        assert_eq!(store.count_rows("dim_product").unwrap(), 1);
        assert_eq!(store.count_rows("dim_date").unwrap(), 0);
        assert_eq!(store.count_rows("rfm_snapshot").unwrap(), 1);
    }
}
