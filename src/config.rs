//! Pipeline configuration: analysis window, score bands and thresholds.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Inclusive calendar window covered by the date dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Default for DateWindow {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2010, 12, 1).expect("valid literal date"),
            end: NaiveDate::from_ymd_opt(2011, 12, 31).expect("valid literal date"),
        }
    }
}

/// Lower bounds (inclusive) for frequency and monetary scores 5, 4, 3, 2,
/// and upper bounds (inclusive) for recency scores 5, 4, 3, 2.
///
/// Anything that matches none of the four bands scores 1. The monetary
/// defaults are a fixed calibration taken from the 80th percentile of
/// historical monthly customer revenue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreBands {
    /// Max days since last purchase for scores 5, 4, 3, 2.
    pub recency_days: [i64; 4],
    /// Min distinct invoices for scores 5, 4, 3, 2.
    pub frequency: [i64; 4],
    /// Min cumulative revenue for scores 5, 4, 3, 2.
    pub monetary: [f64; 4],
}

impl Default for ScoreBands {
    fn default() -> Self {
        Self {
            recency_days: [30, 60, 90, 180],
            frequency: [10, 6, 3, 2],
            monetary: [685.0, 513.0, 342.0, 175.0],
        }
    }
}

impl ScoreBands {
    /// Load bands from a JSON file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bands file {}", path.display()))?;
        let bands: ScoreBands = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse bands file {}", path.display()))?;
        bands.validate()?;
        Ok(bands)
    }

    /// Bands must be ordered so that top-down evaluation is meaningful.
    pub fn validate(&self) -> Result<()> {
        if !self.recency_days.windows(2).all(|w| w[0] < w[1]) {
            bail!(
                "recency bands must be strictly increasing, got {:?}",
                self.recency_days
            );
        }
        if !self.frequency.windows(2).all(|w| w[0] > w[1]) {
            bail!(
                "frequency bands must be strictly decreasing, got {:?}",
                self.frequency
            );
        }
        if !self.monetary.windows(2).all(|w| w[0] > w[1]) {
            bail!(
                "monetary bands must be strictly decreasing, got {:?}",
                self.monetary
            );
        }
        Ok(())
    }
}

/// Everything the pipeline needs beyond its input tables.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub date_window: DateWindow,
    pub bands: ScoreBands,
    /// Minimum distinct customers for a country to be market-significant.
    pub significance_threshold: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            date_window: DateWindow::default(),
            bands: ScoreBands::default(),
            significance_threshold: 20,
        }
    }
}
