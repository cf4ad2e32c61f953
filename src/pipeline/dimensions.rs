//! Dimension builders. Each one is a pure leaf transform over the fact
//! table or a reference table; lookup misses default, they never fail.

use std::collections::{BTreeMap, HashMap};

use chrono::Datelike;
use tracing::{info, warn};

use crate::config::DateWindow;
use crate::data::{CategoryRef, CountryRef};
use crate::types::{CustomerDim, DateDim, GeographyDim, ProductDim, SalesFact};

use super::fact::normalize_product_name;

/// Category for products missing from the manual map.
pub const UNCATEGORISED: &str = "Uncategorised";

/// Region/continent for countries missing from the reference table.
pub const UNKNOWN_REGION: &str = "Unknown";

// ---------------------------------------------------------------------------
// Customer → country
// ---------------------------------------------------------------------------

/// Country of each customer: the country on their earliest fact row.
///
/// Ties on timestamp are broken by invoice id, then product id.
pub fn customer_countries(facts: &[SalesFact]) -> BTreeMap<String, String> {
    let mut earliest: HashMap<&str, &SalesFact> = HashMap::new();
    for fact in facts {
        let key = (fact.invoice_date, fact.transaction_time, &fact.invoice_id, fact.product_id);
        earliest
            .entry(fact.customer_id.as_str())
            .and_modify(|cur| {
                let cur_key = (cur.invoice_date, cur.transaction_time, &cur.invoice_id, cur.product_id);
                if key < cur_key {
                    *cur = fact;
                }
            })
            .or_insert(fact);
    }

    earliest
        .into_iter()
        .map(|(customer, fact)| (customer.to_string(), fact.country.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Geography
// ---------------------------------------------------------------------------

/// Build the geography dimension.
///
/// Country ids are the alphabetical rank (from 1) over the reference table
/// plus any customer country missing from it.
pub fn build_geography(
    reference: &[CountryRef],
    customer_countries: &BTreeMap<String, String>,
    significance_threshold: i64,
) -> Vec<GeographyDim> {
    let mut places: BTreeMap<&str, (&str, &str)> = BTreeMap::new();
    for row in reference {
        if places
            .insert(row.country.as_str(), (row.region.as_str(), row.continent.as_str()))
            .is_some()
        {
            warn!(country = %row.country, "duplicate country in reference table; last row wins");
        }
    }

    let mut counts: HashMap<&str, i64> = HashMap::new();
    for country in customer_countries.values() {
        *counts.entry(country.as_str()).or_default() += 1;
    }

    for country in counts.keys() {
        if !places.contains_key(country) {
            warn!(country = %country, "country missing from reference table");
            places.insert(*country, (UNKNOWN_REGION, UNKNOWN_REGION));
        }
    }

    places
        .into_iter()
        .enumerate()
        .map(|(i, (country, (region, continent)))| {
            let customer_count = counts.get(country).copied().unwrap_or(0);
            GeographyDim {
                country_id: i as i64 + 1,
                country_name: country.to_string(),
                region: region.to_string(),
                continent: continent.to_string(),
                customer_count,
                market_significant: customer_count >= significance_threshold,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Customer
// ---------------------------------------------------------------------------

/// One row per customer, keyed into the geography dimension.
pub fn build_customers(
    customer_countries: &BTreeMap<String, String>,
    geography: &[GeographyDim],
) -> Vec<CustomerDim> {
    let ids: HashMap<&str, i64> = geography
        .iter()
        .map(|g| (g.country_name.as_str(), g.country_id))
        .collect();

    customer_countries
        .iter()
        .filter_map(|(customer, country)| match ids.get(country.as_str()) {
            Some(&country_id) => Some(CustomerDim {
                customer_id: customer.clone(),
                country_id,
            }),
            None => {
                warn!(customer = %customer, country = %country, "customer country has no geography row");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

fn category_key(name: &str) -> Option<String> {
    normalize_product_name(name).map(|n| n.to_lowercase())
}

/// One row per product id in the fact table, with its manual category.
pub fn build_products(facts: &[SalesFact], categories: &[CategoryRef]) -> Vec<ProductDim> {
    let lookup: HashMap<String, &str> = categories
        .iter()
        .filter_map(|c| category_key(&c.product).map(|k| (k, c.category.as_str())))
        .collect();

    let mut products: BTreeMap<i64, &str> = BTreeMap::new();
    for fact in facts {
        products.entry(fact.product_id).or_insert(fact.product_name.as_str());
    }

    let rows: Vec<ProductDim> = products
        .into_iter()
        .map(|(product_id, name)| {
            let category = category_key(name)
                .and_then(|k| lookup.get(&k).copied())
                .unwrap_or(UNCATEGORISED);
            ProductDim {
                product_id,
                product_name: name.to_string(),
                category: category.to_string(),
            }
        })
        .collect();

    let uncategorised = rows.iter().filter(|p| p.category == UNCATEGORISED).count();
    info!(products = rows.len(), uncategorised, "built product dimension");
    rows
}

// ---------------------------------------------------------------------------
// Date
// ---------------------------------------------------------------------------

/// Quarter from fixed three-month buckets: Jan–Mar is 1 … Oct–Dec is 4.
pub fn quarter_of(month: u32) -> u32 {
    (month - 1) / 3 + 1
}

/// One row per calendar day in the window, inclusive on both ends.
pub fn build_dates(window: &DateWindow) -> Vec<DateDim> {
    window
        .start
        .iter_days()
        .take_while(|d| *d <= window.end)
        .map(|date| {
            let quarter = quarter_of(date.month());
            DateDim {
                date,
                day: date.day(),
                month: date.month(),
                year: date.year(),
                day_of_week: date.weekday().number_from_monday(),
                weekday_name: date.format("%A").to_string(),
                month_name: date.format("%B").to_string(),
                quarter,
                quarter_label: format!("Q{} {}", quarter, date.year()),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
