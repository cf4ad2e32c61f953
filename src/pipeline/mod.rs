pub mod cohort;
pub mod dimensions;
pub mod fact;
pub mod rfm;

use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::data::{CategoryRef, CountryRef, SourceBatch};
use crate::types::{RejectionCounts, StarSchema};

use self::fact::FactStats;
use self::rfm::Segmenter;

/// Counts gathered while building the star schema.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    /// Data rows in the transaction export.
    pub rows_read: usize,
    pub facts: FactStats,
    /// Source parse rejections merged with fact-builder rejections.
    pub rejections: RejectionCounts,
}

/// Runs the four stages in order: facts, dimensions, cohorts, RFM.
pub struct Pipeline {
    config: PipelineConfig,
    segmenter: Box<dyn Segmenter>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, segmenter: Box<dyn Segmenter>) -> Self {
        Self { config, segmenter }
    }

    pub fn segmenter_name(&self) -> &str {
        self.segmenter.name()
    }

    /// Build every table from a parsed export and the reference tables.
    pub fn run(
        &self,
        batch: &SourceBatch,
        countries: &[CountryRef],
        categories: &[CategoryRef],
    ) -> (StarSchema, BuildStats) {
        for segment in rfm::segment::rollup_mismatches() {
            warn!(
                segment,
                priority = rfm::segment_priority(segment),
                "segment name does not match its priority bucket"
            );
        }

        let (facts, fact_stats) = fact::build_facts(&batch.records);

        let owners = dimensions::customer_countries(&facts);
        let geography =
            dimensions::build_geography(countries, &owners, self.config.significance_threshold);
        let customers = dimensions::build_customers(&owners, &geography);
        let products = dimensions::build_products(&facts, categories);
        let dates = dimensions::build_dates(&self.config.date_window);
        info!(
            customers = customers.len(),
            countries = geography.len(),
            products = products.len(),
            dates = dates.len(),
            "built dimensions"
        );

        let cohorts = cohort::build_cohorts(&facts, &customers);
        let snapshots =
            rfm::build_rfm(&facts, &dates, &self.config.bands, self.segmenter.as_ref());

        let mut rejections = batch.rejections.clone();
        rejections.merge(&fact_stats.rejections);

        let stats = BuildStats {
            rows_read: batch.rows_read,
            facts: fact_stats,
            rejections,
        };
        let star = StarSchema {
            facts,
            customers,
            geography,
            products,
            dates,
            cohorts,
            rfm: snapshots,
        };
        (star, stats)
    }
}
