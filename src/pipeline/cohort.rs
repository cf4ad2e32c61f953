//! Cohort aggregator: monthly retention per (country, acquisition month).
//!
//! Built in two explicit passes: [`aggregate_activity`] counts distinct
//! active customers per (country, cohort month, months since acquisition),
//! then [`backfill_cohort_size`] broadcasts each cohort's month-0 count onto
//! every row of that cohort.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, Days, NaiveDate};
use tracing::{info, warn};

use crate::types::{CohortRow, CustomerDim, SalesFact};

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

/// Whole calendar months from `from` to `to`, ignoring the day of month.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    i64::from(to.year() - from.year()) * 12 + i64::from(to.month()) - i64::from(from.month())
}

/// Pass 1: distinct active customers per (country, cohort month, offset).
///
/// Only Sale rows count as activity. `cohort_size` is left at zero.
pub fn aggregate_activity(facts: &[SalesFact], customers: &[CustomerDim]) -> Vec<CohortRow> {
    let countries: HashMap<&str, i64> = customers
        .iter()
        .map(|c| (c.customer_id.as_str(), c.country_id))
        .collect();

    let mut activity: HashMap<&str, BTreeSet<NaiveDate>> = HashMap::new();
    for fact in facts.iter().filter(|f| f.is_sale()) {
        activity
            .entry(fact.customer_id.as_str())
            .or_default()
            .insert(month_start(fact.invoice_date));
    }

    let mut counts: BTreeMap<(i64, NaiveDate, i64), i64> = BTreeMap::new();
    for (customer, months) in &activity {
        let Some(&country_id) = countries.get(customer) else {
            warn!(customer = %customer, "customer missing from customer dimension; skipped");
            continue;
        };
        // BTreeSet is ordered: the first month is the acquisition month.
        let Some(&cohort_month) = months.first() else {
            continue;
        };
        for &month in months {
            let offset = months_between(cohort_month, month);
            *counts.entry((country_id, cohort_month, offset)).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .map(
            |((country_id, cohort_month, months_since_acquisition), active_customers)| CohortRow {
                country_id,
                cohort_month,
                months_since_acquisition,
                active_customers,
                cohort_size: 0,
            },
        )
        .collect()
}

/// Pass 2: set every row's `cohort_size` to its cohort's month-0 count.
pub fn backfill_cohort_size(rows: &mut [CohortRow]) {
    let sizes: HashMap<(i64, NaiveDate), i64> = rows
        .iter()
        .filter(|r| r.months_since_acquisition == 0)
        .map(|r| ((r.country_id, r.cohort_month), r.active_customers))
        .collect();

    for row in rows.iter_mut() {
        row.cohort_size = sizes
            .get(&(row.country_id, row.cohort_month))
            .copied()
            .unwrap_or(0);
    }
}

/// Build the cohort retention table.
pub fn build_cohorts(facts: &[SalesFact], customers: &[CustomerDim]) -> Vec<CohortRow> {
    let mut rows = aggregate_activity(facts, customers);
    backfill_cohort_size(&mut rows);

    let cohorts = rows
        .iter()
        .filter(|r| r.months_since_acquisition == 0)
        .count();
    info!(rows = rows.len(), cohorts, "built cohort retention");
    rows
}
