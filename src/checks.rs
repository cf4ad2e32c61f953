//! Consistency checks over a materialized star schema.
//!
//! Backs the `validate` command: every check reloads rows through
//! [`StarStore`] and reports violations instead of failing fast, so one run
//! lists everything that is wrong with a database.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use tracing::info;

use crate::data::StarStore;
use crate::pipeline::cohort::month_start;
use crate::pipeline::rfm::DROPPED_OFF;
use crate::types::{CohortRow, GeographyDim, RfmSnapshot, SalesFact};

/// One failed property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub check: &'static str,
    pub detail: String,
}

impl Violation {
    fn new(check: &'static str, detail: impl Into<String>) -> Self {
        Self {
            check,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.check, self.detail)
    }
}

pub fn check_facts(facts: &[SalesFact]) -> Vec<Violation> {
    let mut out = Vec::new();
    let mut ledgers: BTreeMap<(&str, i64), (i64, i64)> = BTreeMap::new();

    for fact in facts {
        if fact.unit_price <= 0.0 {
            out.push(Violation::new(
                "fact_price",
                format!("invoice {} has unit price {}", fact.invoice_id, fact.unit_price),
            ));
        }
        if fact.customer_id.trim().is_empty() {
            out.push(Violation::new(
                "fact_customer",
                format!("invoice {} has no customer", fact.invoice_id),
            ));
        }
        let (sold, returned) = ledgers
            .entry((fact.customer_id.as_str(), fact.product_id))
            .or_default();
        if fact.is_sale() {
            *sold += fact.quantity;
        } else {
            *returned += -fact.quantity;
        }
    }

    for ((customer, product_id), (sold, returned)) in ledgers {
        if returned > sold {
            out.push(Violation::new(
                "fact_returns",
                format!(
                    "customer {} returned {} of product {} but bought {}",
                    customer, returned, product_id, sold
                ),
            ));
        }
    }
    out
}

pub fn check_cohorts(cohorts: &[CohortRow]) -> Vec<Violation> {
    let mut out = Vec::new();
    let mut month_zero: HashMap<(i64, chrono::NaiveDate), i64> = HashMap::new();

    for row in cohorts {
        if row.months_since_acquisition < 0 {
            out.push(Violation::new(
                "cohort_offset",
                format!(
                    "country {} cohort {} has negative offset {}",
                    row.country_id, row.cohort_month, row.months_since_acquisition
                ),
            ));
        }
        if month_start(row.cohort_month) != row.cohort_month {
            out.push(Violation::new(
                "cohort_month",
                format!("cohort month {} is not a month start", row.cohort_month),
            ));
        }
        if row.months_since_acquisition == 0 {
            month_zero.insert((row.country_id, row.cohort_month), row.active_customers);
        }
    }

    for row in cohorts {
        match month_zero.get(&(row.country_id, row.cohort_month)) {
            Some(&size) if size == row.cohort_size => {}
            Some(&size) => out.push(Violation::new(
                "cohort_size",
                format!(
                    "country {} cohort {} offset {} has size {}, month 0 has {}",
                    row.country_id,
                    row.cohort_month,
                    row.months_since_acquisition,
                    row.cohort_size,
                    size
                ),
            )),
            None => out.push(Violation::new(
                "cohort_size",
                format!(
                    "country {} cohort {} has no month-0 row",
                    row.country_id, row.cohort_month
                ),
            )),
        }
    }
    out
}

pub fn check_rfm(rows: &[RfmSnapshot]) -> Vec<Violation> {
    let mut out = Vec::new();

    let mut by_customer: BTreeMap<&str, Vec<&RfmSnapshot>> = BTreeMap::new();
    for row in rows {
        by_customer.entry(row.customer_id.as_str()).or_default().push(row);

        for score in [row.recency_score, row.frequency_score, row.monetary_score] {
            if !(1..=5).contains(&score) {
                out.push(Violation::new(
                    "rfm_score",
                    format!(
                        "customer {} at {} has score {}",
                        row.customer_id, row.snapshot_date, score
                    ),
                ));
            }
        }
        let expected = format!(
            "{}{}{}",
            row.recency_score, row.frequency_score, row.monetary_score
        );
        if row.rfm_code.len() != 3 || row.rfm_code != expected {
            out.push(Violation::new(
                "rfm_code",
                format!(
                    "customer {} at {} has code {:?}, scores give {}",
                    row.customer_id, row.snapshot_date, row.rfm_code, expected
                ),
            ));
        }
    }

    let index: HashMap<(&str, chrono::NaiveDate), &RfmSnapshot> = rows
        .iter()
        .map(|r| ((r.customer_id.as_str(), r.snapshot_date), r))
        .collect();

    for (customer, mut history) in by_customer {
        history.sort_by_key(|r| r.snapshot_date);
        for pair in history.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next.frequency < prev.frequency || next.monetary < prev.monetary {
                out.push(Violation::new(
                    "rfm_monotonic",
                    format!(
                        "customer {} decreases between {} and {}",
                        customer, prev.snapshot_date, next.snapshot_date
                    ),
                ));
            }
        }

        for row in &history {
            for (i, outlook) in row.outlook.iter().enumerate() {
                let future = outlook
                    .snapshot_date
                    .and_then(|date| index.get(&(customer, date)));
                let consistent = match future {
                    Some(future) => outlook.rfm_segment == future.rfm_segment,
                    None => outlook.rfm_segment == DROPPED_OFF,
                };
                if !consistent {
                    out.push(Violation::new(
                        "rfm_lookahead",
                        format!(
                            "customer {} at {} month {} reads {:?}",
                            customer,
                            row.snapshot_date,
                            i + 1,
                            outlook.rfm_segment
                        ),
                    ));
                }
            }
        }
    }
    out
}

pub fn check_geography(geography: &[GeographyDim], threshold: i64) -> Vec<Violation> {
    geography
        .iter()
        .filter(|g| g.market_significant != (g.customer_count >= threshold))
        .map(|g| {
            Violation::new(
                "geography_significance",
                format!(
                    "{} has {} customers but significance {}",
                    g.country_name,
                    g.customer_count,
                    crate::types::yes_no::label(g.market_significant)
                ),
            )
        })
        .collect()
}

/// Reload the stored tables and run every check.
pub fn run_checks(store: &dyn StarStore, significance_threshold: i64) -> Result<Vec<Violation>> {
    let facts = store.load_facts().context("failed to load fact_sales")?;
    let cohorts = store.load_cohorts().context("failed to load cohort_retention")?;
    let rfm = store.load_rfm().context("failed to load rfm_snapshot")?;
    let geography = store.load_geography().context("failed to load dim_geography")?;

    let mut violations = check_facts(&facts);
    violations.extend(check_cohorts(&cohorts));
    violations.extend(check_rfm(&rfm));
    violations.extend(check_geography(&geography, significance_threshold));

    info!(
        facts = facts.len(),
        cohorts = cohorts.len(),
        rfm = rfm.len(),
        violations = violations.len(),
        "checked star schema"
    );
    Ok(violations)
}
