use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use crate::data::schema;
use crate::pipeline::rfm::segment::{segment_priority, SEGMENT_RULES};
use crate::pipeline::BuildStats;
use crate::types::{RfmSnapshotRecord, StarSchema};

/// Summary of one pipeline build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub segmenter_name: String,

    // Input
    pub rows_read: usize,
    pub rejected: usize,
    pub rejections: Vec<(&'static str, usize)>,

    // Facts
    pub fact_rows: usize,
    pub sales: usize,
    pub returns_kept: usize,
    pub returns_dropped: usize,
    pub revenue: f64,

    // Tables
    pub table_rows: Vec<(&'static str, usize)>,

    // Segments at the latest snapshot
    pub latest_snapshot: Option<NaiveDate>,
    pub segments: Vec<(String, usize)>,
    pub priorities: Vec<(String, usize)>,
}

impl BuildReport {
    /// Build a report from the pipeline output.
    pub fn from_build(star: &StarSchema, stats: &BuildStats, segmenter_name: &str) -> Self {
        let latest_snapshot = star.rfm.iter().map(|r| r.snapshot_date).max();

        let mut segments: BTreeMap<String, usize> = BTreeMap::new();
        let mut priorities: BTreeMap<String, usize> = BTreeMap::new();
        if let Some(latest) = latest_snapshot {
            for row in star.rfm.iter().filter(|r| r.snapshot_date == latest) {
                *segments.entry(row.rfm_segment.clone()).or_default() += 1;
                *priorities.entry(row.segment_priority.clone()).or_default() += 1;
            }
        }

        // Largest first, ties by name.
        let ranked = |counts: BTreeMap<String, usize>| {
            let mut v: Vec<(String, usize)> = counts.into_iter().collect();
            v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            v
        };

        let table_rows = vec![
            (schema::FACT_SALES.name, star.facts.len()),
            (schema::DIM_CUSTOMER.name, star.customers.len()),
            (schema::DIM_GEOGRAPHY.name, star.geography.len()),
            (schema::DIM_PRODUCT.name, star.products.len()),
            (schema::DIM_DATE.name, star.dates.len()),
            (schema::COHORT_RETENTION.name, star.cohorts.len()),
            (schema::RFM_SNAPSHOT.name, star.rfm.len()),
        ];

        Self {
            segmenter_name: segmenter_name.to_string(),
            rows_read: stats.rows_read,
            rejected: stats.rejections.total(),
            rejections: stats.rejections.iter().collect(),
            fact_rows: star.facts.len(),
            sales: stats.facts.sales,
            returns_kept: stats.facts.returns_kept,
            returns_dropped: stats.facts.returns_dropped,
            revenue: star.facts.iter().map(|f| f.total_amount).sum(),
            table_rows,
            latest_snapshot,
            segments: ranked(segments),
            priorities: ranked(priorities),
        }
    }

    /// Print a formatted text report to stdout.
    pub fn print(&self) {
        let pct = |n: usize, d: usize| -> f64 {
            if d > 0 {
                n as f64 / d as f64 * 100.0
            } else {
                0.0
            }
        };

        println!();
        println!("{}", "=".repeat(55));
        println!("  retailstar build ({} segments)", self.segmenter_name);
        println!("{}", "=".repeat(55));
        println!();
        println!("  Rows read:      {}", self.rows_read);
        println!(
            "  Fact rows:      {}    ({:.1}%)",
            self.fact_rows,
            pct(self.fact_rows, self.rows_read)
        );
        println!("  Sales:          {}", self.sales);
        println!("  Returns kept:   {}", self.returns_kept);
        println!("  Returns dropped: {}", self.returns_dropped);
        println!("  Net revenue:    {:.2}", self.revenue);

        println!();
        println!("  --- Rejections {}", "-".repeat(38));
        if self.rejections.is_empty() {
            println!("  (none)");
        }
        for (kind, n) in &self.rejections {
            println!("  {:<22} {:>8}", kind, n);
        }
        println!("  {:<22} {:>8}", "total", self.rejected);

        println!();
        println!("  --- Tables {}", "-".repeat(42));
        for (table, n) in &self.table_rows {
            println!("  {:<22} {:>8}", table, n);
        }

        println!();
        match self.latest_snapshot {
            Some(date) => println!("  --- Segments at {} {}", date, "-".repeat(25)),
            None => println!("  --- Segments {}", "-".repeat(40)),
        }
        let customers: usize = self.segments.iter().map(|(_, n)| n).sum();
        for (segment, n) in &self.segments {
            println!(
                "  {:<22} {:>8}    ({:.1}%)",
                segment,
                n,
                pct(*n, customers)
            );
        }
        println!();
        for (priority, n) in &self.priorities {
            println!(
                "  {:<22} {:>8}    ({:.1}%)",
                priority,
                n,
                pct(*n, customers)
            );
        }

        println!();
        println!("{}", "=".repeat(55));
        println!();
    }
}

/// Print the built-in segment rules and their priority buckets.
pub fn print_segment_rules() {
    println!();
    println!("Segment rules (first match wins):");
    println!();
    for rule in SEGMENT_RULES {
        println!(
            "  {:<22} {:<26} -> {}",
            rule.segment,
            rule.condition,
            segment_priority(rule.segment)
        );
    }
    println!(
        "  {:<22} {:<26} -> {}",
        crate::pipeline::rfm::segment::OTHERS,
        "no rule matches",
        segment_priority(crate::pipeline::rfm::segment::OTHERS)
    );
    println!();
}

fn write_table<T: Serialize>(dir: &Path, table: &str, rows: impl IntoIterator<Item = T>) -> Result<PathBuf> {
    let path = dir.join(format!("{}.csv", table));
    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("failed to create CSV at {}", path.display()))?;

    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("failed to write CSV row to {}", path.display()))?;
    }

    wtr.flush().context("failed to flush CSV")?;
    Ok(path)
}

/// Export every table as `<table>.csv` into `dir`, creating it if needed.
pub fn export_csv(star: &StarSchema, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export directory {}", dir.display()))?;

    Ok(vec![
        write_table(dir, schema::FACT_SALES.name, &star.facts)?,
        write_table(dir, schema::DIM_CUSTOMER.name, &star.customers)?,
        write_table(dir, schema::DIM_GEOGRAPHY.name, &star.geography)?,
        write_table(dir, schema::DIM_PRODUCT.name, &star.products)?,
        write_table(dir, schema::DIM_DATE.name, &star.dates)?,
        write_table(dir, schema::COHORT_RETENTION.name, &star.cohorts)?,
        write_table(
            dir,
            schema::RFM_SNAPSHOT.name,
            star.rfm.iter().map(RfmSnapshotRecord::from),
        )?,
    ])
}
