/// DDL and insert statements for the star-schema tables.

/// One output table: how to create it and how to insert a row.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub create: &'static str,
    pub insert: &'static str,
}

pub const FACT_SALES: TableDef = TableDef {
    name: "fact_sales",
    create: "
CREATE TABLE IF NOT EXISTS fact_sales (
    invoice_id       TEXT NOT NULL,
    customer_id      TEXT NOT NULL,
    product_id       INTEGER NOT NULL,
    product_name     TEXT NOT NULL,
    invoice_date     TEXT NOT NULL,
    transaction_time TEXT NOT NULL,
    transaction_type TEXT NOT NULL CHECK (transaction_type IN ('Sale', 'Return')),
    quantity         INTEGER NOT NULL,
    unit_price       REAL NOT NULL CHECK (unit_price > 0),
    total_amount     REAL NOT NULL,
    country          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_fact_sales_customer ON fact_sales(customer_id, invoice_date);
CREATE INDEX IF NOT EXISTS idx_fact_sales_product ON fact_sales(product_id);
",
    insert: "
INSERT INTO fact_sales
    (invoice_id, customer_id, product_id, product_name, invoice_date, transaction_time,
     transaction_type, quantity, unit_price, total_amount, country)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
",
};

pub const DIM_CUSTOMER: TableDef = TableDef {
    name: "dim_customer",
    create: "
CREATE TABLE IF NOT EXISTS dim_customer (
    customer_id TEXT PRIMARY KEY,
    country_id  INTEGER NOT NULL
);
",
    insert: "INSERT INTO dim_customer (customer_id, country_id) VALUES (?1, ?2)",
};

pub const DIM_GEOGRAPHY: TableDef = TableDef {
    name: "dim_geography",
    create: "
CREATE TABLE IF NOT EXISTS dim_geography (
    country_id         INTEGER PRIMARY KEY,
    country_name       TEXT NOT NULL UNIQUE,
    region             TEXT NOT NULL,
    continent          TEXT NOT NULL,
    customer_count     INTEGER NOT NULL,
    market_significant TEXT NOT NULL CHECK (market_significant IN ('Yes', 'No'))
);
",
    insert: "
INSERT INTO dim_geography
    (country_id, country_name, region, continent, customer_count, market_significant)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
",
};

pub const DIM_PRODUCT: TableDef = TableDef {
    name: "dim_product",
    create: "
CREATE TABLE IF NOT EXISTS dim_product (
    product_id   INTEGER PRIMARY KEY,
    product_name TEXT NOT NULL UNIQUE,
    category     TEXT NOT NULL
);
",
    insert: "INSERT INTO dim_product (product_id, product_name, category) VALUES (?1, ?2, ?3)",
};

pub const DIM_DATE: TableDef = TableDef {
    name: "dim_date",
    create: "
CREATE TABLE IF NOT EXISTS dim_date (
    date          TEXT PRIMARY KEY,
    day           INTEGER NOT NULL,
    month         INTEGER NOT NULL,
    year          INTEGER NOT NULL,
    day_of_week   INTEGER NOT NULL,
    weekday_name  TEXT NOT NULL,
    month_name    TEXT NOT NULL,
    quarter       INTEGER NOT NULL,
    quarter_label TEXT NOT NULL
);
",
    insert: "
INSERT INTO dim_date
    (date, day, month, year, day_of_week, weekday_name, month_name, quarter, quarter_label)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
",
};

pub const COHORT_RETENTION: TableDef = TableDef {
    name: "cohort_retention",
    create: "
CREATE TABLE IF NOT EXISTS cohort_retention (
    country_id               INTEGER NOT NULL,
    cohort_month             TEXT NOT NULL,
    months_since_acquisition INTEGER NOT NULL CHECK (months_since_acquisition >= 0),
    active_customers         INTEGER NOT NULL,
    cohort_size              INTEGER NOT NULL,
    PRIMARY KEY (country_id, cohort_month, months_since_acquisition)
);
",
    insert: "
INSERT INTO cohort_retention
    (country_id, cohort_month, months_since_acquisition, active_customers, cohort_size)
VALUES (?1, ?2, ?3, ?4, ?5)
",
};

pub const RFM_SNAPSHOT: TableDef = TableDef {
    name: "rfm_snapshot",
    create: "
CREATE TABLE IF NOT EXISTS rfm_snapshot (
    customer_id              TEXT NOT NULL,
    snapshot_date            TEXT NOT NULL,
    last_purchase_date       TEXT NOT NULL,
    frequency                INTEGER NOT NULL,
    monetary                 REAL NOT NULL,
    recency_days             INTEGER NOT NULL,
    recency_score            INTEGER NOT NULL CHECK (recency_score BETWEEN 1 AND 5),
    frequency_score          INTEGER NOT NULL CHECK (frequency_score BETWEEN 1 AND 5),
    monetary_score           INTEGER NOT NULL CHECK (monetary_score BETWEEN 1 AND 5),
    rfm_code                 TEXT NOT NULL,
    rfm_segment              TEXT NOT NULL,
    segment_priority         TEXT NOT NULL,
    month_1_snapshot_date    TEXT,
    month_1_rfm_segment      TEXT NOT NULL,
    month_1_segment_priority TEXT NOT NULL,
    month_2_snapshot_date    TEXT,
    month_2_rfm_segment      TEXT NOT NULL,
    month_2_segment_priority TEXT NOT NULL,
    month_3_snapshot_date    TEXT,
    month_3_rfm_segment      TEXT NOT NULL,
    month_3_segment_priority TEXT NOT NULL,
    month_4_snapshot_date    TEXT,
    month_4_rfm_segment      TEXT NOT NULL,
    month_4_segment_priority TEXT NOT NULL,
    PRIMARY KEY (customer_id, snapshot_date)
);
",
    insert: "
INSERT INTO rfm_snapshot
    (customer_id, snapshot_date, last_purchase_date, frequency, monetary, recency_days,
     recency_score, frequency_score, monetary_score, rfm_code, rfm_segment, segment_priority,
     month_1_snapshot_date, month_1_rfm_segment, month_1_segment_priority,
     month_2_snapshot_date, month_2_rfm_segment, month_2_segment_priority,
     month_3_snapshot_date, month_3_rfm_segment, month_3_segment_priority,
     month_4_snapshot_date, month_4_rfm_segment, month_4_segment_priority)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
        ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
",
};

/// All tables, in dependency order.
pub const ALL_TABLES: [TableDef; 7] = [
    FACT_SALES,
    DIM_CUSTOMER,
    DIM_GEOGRAPHY,
    DIM_PRODUCT,
    DIM_DATE,
    COHORT_RETENTION,
    RFM_SNAPSHOT,
];

// ---------------------------------------------------------------------------
// Read-back queries
// ---------------------------------------------------------------------------

pub const LOAD_FACTS: &str = "
SELECT invoice_id, customer_id, product_id, product_name, invoice_date, transaction_time,
       transaction_type, quantity, unit_price, total_amount, country
FROM fact_sales
ORDER BY invoice_date, transaction_time, invoice_id
";

pub const LOAD_COHORTS: &str = "
SELECT country_id, cohort_month, months_since_acquisition, active_customers, cohort_size
FROM cohort_retention
ORDER BY country_id, cohort_month, months_since_acquisition
";

pub const LOAD_RFM: &str = "
SELECT customer_id, snapshot_date, last_purchase_date, frequency, monetary, recency_days,
       recency_score, frequency_score, monetary_score, rfm_code, rfm_segment, segment_priority,
       month_1_snapshot_date, month_1_rfm_segment, month_1_segment_priority,
       month_2_snapshot_date, month_2_rfm_segment, month_2_segment_priority,
       month_3_snapshot_date, month_3_rfm_segment, month_3_segment_priority,
       month_4_snapshot_date, month_4_rfm_segment, month_4_segment_priority
FROM rfm_snapshot
ORDER BY customer_id, snapshot_date
";

pub const LOAD_GEOGRAPHY: &str = "
SELECT country_id, country_name, region, continent, customer_count, market_significant
FROM dim_geography
ORDER BY country_id
";
