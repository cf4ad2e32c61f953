//! RFM scorer: monthly cumulative recency/frequency/monetary snapshots per
//! customer, with a four-month segment lookahead.

pub mod score;
pub mod scripted;
pub mod segment;

use std::collections::{HashMap, HashSet};

use chrono::{Months, NaiveDate};
use tracing::info;

use crate::config::ScoreBands;
use crate::types::{DateDim, RfmSnapshot, SalesFact, SegmentOutlook, LOOKAHEAD_MONTHS};

pub use score::RfmScores;
pub use scripted::RhaiSegmenter;
pub use segment::{
    create_segmenter, segment_priority, RuleTableSegmenter, Segmenter, DROPPED_OFF,
};

/// Month starts of the date dimension on or before the latest invoice date.
pub fn snapshot_dates(dates: &[DateDim], latest_invoice: NaiveDate) -> Vec<NaiveDate> {
    let mut snapshots: Vec<NaiveDate> = dates
        .iter()
        .filter(|d| d.is_month_start() && d.date <= latest_invoice)
        .map(|d| d.date)
        .collect();
    snapshots.sort();
    snapshots.dedup();
    snapshots
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Score every customer at every snapshot date.
///
/// Aggregation is cumulative over fact rows dated on or before the
/// snapshot. Frequency counts distinct invoices of both types; monetary and
/// the last purchase date come from Sale rows only, so monetary never
/// decreases. A customer gets a row from their first snapshot after their
/// first purchase onwards. Lookahead columns are left empty; see
/// [`attach_lookahead`].
pub fn score_snapshots(
    facts: &[SalesFact],
    snapshots: &[NaiveDate],
    bands: &ScoreBands,
    segmenter: &dyn Segmenter,
) -> Vec<RfmSnapshot> {
    let mut by_customer: HashMap<&str, Vec<&SalesFact>> = HashMap::new();
    for fact in facts {
        by_customer
            .entry(fact.customer_id.as_str())
            .or_default()
            .push(fact);
    }

    let mut customers: Vec<&str> = by_customer.keys().copied().collect();
    customers.sort_unstable();

    let mut rows = Vec::new();
    for customer in customers {
        let mut history = by_customer.remove(customer).unwrap_or_default();
        history.sort_by_key(|f| f.invoice_date);

        let mut invoices: HashSet<&str> = HashSet::new();
        let mut monetary = 0.0;
        let mut last_purchase: Option<NaiveDate> = None;
        let mut next = 0;

        for &snapshot in snapshots {
            while next < history.len() && history[next].invoice_date <= snapshot {
                let fact = history[next];
                invoices.insert(fact.invoice_id.as_str());
                if fact.is_sale() {
                    monetary += fact.total_amount;
                    last_purchase = Some(fact.invoice_date);
                }
                next += 1;
            }
            let Some(last_purchase_date) = last_purchase else {
                continue;
            };

            let frequency = invoices.len() as i64;
            let monetary = round_cents(monetary);
            let recency_days = (snapshot - last_purchase_date).num_days();
            let scores = bands.score(recency_days, frequency, monetary);
            let rfm_segment = segmenter.segment(&scores);
            let segment_priority = segment_priority(&rfm_segment).to_string();

            rows.push(RfmSnapshot {
                customer_id: customer.to_string(),
                snapshot_date: snapshot,
                last_purchase_date,
                frequency,
                monetary,
                recency_days,
                recency_score: scores.recency,
                frequency_score: scores.frequency,
                monetary_score: scores.monetary,
                rfm_code: scores.code(),
                rfm_segment,
                segment_priority,
                outlook: Default::default(),
            });
        }
    }
    rows
}

/// Fill the 1..=4 month lookahead of every row from a single index keyed
/// by (customer, snapshot date). Missing targets read `Dropped Off`.
pub fn attach_lookahead(rows: &mut [RfmSnapshot]) {
    let outlooks: Vec<[SegmentOutlook; LOOKAHEAD_MONTHS]> = {
        let index: HashMap<(&str, NaiveDate), &RfmSnapshot> = rows
            .iter()
            .map(|r| ((r.customer_id.as_str(), r.snapshot_date), r))
            .collect();

        rows.iter()
            .map(|row| {
                std::array::from_fn::<_, LOOKAHEAD_MONTHS, _>(|i| {
                    let target = row.snapshot_date.checked_add_months(Months::new(i as u32 + 1));
                    let found = target
                        .and_then(|date| index.get(&(row.customer_id.as_str(), date)));
                    match found {
                        Some(future) => SegmentOutlook {
                            snapshot_date: Some(future.snapshot_date),
                            rfm_segment: future.rfm_segment.clone(),
                            segment_priority: future.segment_priority.clone(),
                        },
                        None => SegmentOutlook {
                            snapshot_date: target,
                            rfm_segment: DROPPED_OFF.to_string(),
                            segment_priority: DROPPED_OFF.to_string(),
                        },
                    }
                })
            })
            .collect()
    };

    for (row, outlook) in rows.iter_mut().zip(outlooks) {
        row.outlook = outlook;
    }
}

/// Build the RFM snapshot table.
pub fn build_rfm(
    facts: &[SalesFact],
    dates: &[DateDim],
    bands: &ScoreBands,
    segmenter: &dyn Segmenter,
) -> Vec<RfmSnapshot> {
    let Some(latest) = facts.iter().map(|f| f.invoice_date).max() else {
        return Vec::new();
    };
    let snapshots = snapshot_dates(dates, latest);

    let mut rows = score_snapshots(facts, &snapshots, bands, segmenter);
    attach_lookahead(&mut rows);

    info!(
        rows = rows.len(),
        snapshots = snapshots.len(),
        segmenter = segmenter.name(),
        "built rfm snapshots"
    );
    rows
}
