//! Segment assignment and the priority rollup.

use std::path::Path;

use anyhow::Result;

use super::score::RfmScores;
use super::scripted::RhaiSegmenter;

pub const CHAMPIONS: &str = "Champions";
pub const LOYAL_CUSTOMERS: &str = "Loyal Customers";
pub const POTENTIAL_LOYALISTS: &str = "Potential Loyalists";
pub const NEW_CUSTOMERS: &str = "New Customers";
pub const BIG_SPENDERS: &str = "Big Spenders";
pub const HIGH_RISK: &str = "High Risk";
pub const HIBERNATING: &str = "Hibernating";
pub const LOW_VALUE_RECENT: &str = "Low Value Recent";
pub const OTHERS: &str = "Others";

/// Segment recorded by the lookahead when a customer has no snapshot.
pub const DROPPED_OFF: &str = "Dropped Off";

/// Name the priority rollup expects for the high-risk bucket. The rule
/// table emits [`HIGH_RISK`] instead, so that segment rolls up to
/// `Low Engagement`. Kept as-is until the intended business meaning is
/// confirmed.
pub const AT_RISK: &str = "At Risk";

pub const PRIORITY_HIGH_VALUE: &str = "High Value";
pub const PRIORITY_GROWTH: &str = "Growth";
pub const PRIORITY_HIGH_RISK: &str = "High Risk";
pub const PRIORITY_LOW_ENGAGEMENT: &str = "Low Engagement";

/// One row of the ordered segment rule table.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRule {
    pub segment: &'static str,
    /// Human-readable condition, for listings.
    pub condition: &'static str,
    pub matches: fn(&RfmScores) -> bool,
}

/// Ordered rules; the first match wins, no match means [`OTHERS`].
pub const SEGMENT_RULES: &[SegmentRule] = &[
    SegmentRule {
        segment: CHAMPIONS,
        condition: "R=5 and F>=4 and M>=4",
        matches: |s| s.recency == 5 && s.frequency >= 4 && s.monetary >= 4,
    },
    SegmentRule {
        segment: LOYAL_CUSTOMERS,
        condition: "R>=4 and F>=3 and M>=3",
        matches: |s| s.recency >= 4 && s.frequency >= 3 && s.monetary >= 3,
    },
    SegmentRule {
        segment: POTENTIAL_LOYALISTS,
        condition: "R>=4 and F=2 and M>=2",
        matches: |s| s.recency >= 4 && s.frequency == 2 && s.monetary >= 2,
    },
    SegmentRule {
        segment: NEW_CUSTOMERS,
        condition: "R>=4 and F=1",
        matches: |s| s.recency >= 4 && s.frequency == 1,
    },
    SegmentRule {
        segment: BIG_SPENDERS,
        condition: "M=5 and F<=2 and R>=3",
        matches: |s| s.monetary == 5 && s.frequency <= 2 && s.recency >= 3,
    },
    SegmentRule {
        segment: HIGH_RISK,
        condition: "R<=2 and F>=3 and M>=3",
        matches: |s| s.recency <= 2 && s.frequency >= 3 && s.monetary >= 3,
    },
    SegmentRule {
        segment: HIBERNATING,
        condition: "R<=2 and F<=2 and M<=2",
        matches: |s| s.recency <= 2 && s.frequency <= 2 && s.monetary <= 2,
    },
    SegmentRule {
        segment: LOW_VALUE_RECENT,
        condition: "R>=3 and F<=2 and M<=2",
        matches: |s| s.recency >= 3 && s.frequency <= 2 && s.monetary <= 2,
    },
];

/// Maps RFM scores to a named segment.
pub trait Segmenter: Send {
    fn name(&self) -> &str;
    fn segment(&self, scores: &RfmScores) -> String;
}

/// The built-in ordered rule table.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTableSegmenter;

impl RuleTableSegmenter {
    pub fn classify(scores: &RfmScores) -> &'static str {
        SEGMENT_RULES
            .iter()
            .find(|rule| (rule.matches)(scores))
            .map(|rule| rule.segment)
            .unwrap_or(OTHERS)
    }
}

impl Segmenter for RuleTableSegmenter {
    fn name(&self) -> &str {
        "rule-table"
    }

    fn segment(&self, scores: &RfmScores) -> String {
        Self::classify(scores).to_string()
    }
}

/// Roll a segment up to its priority bucket.
pub fn segment_priority(segment: &str) -> &'static str {
    match segment {
        CHAMPIONS | LOYAL_CUSTOMERS | BIG_SPENDERS => PRIORITY_HIGH_VALUE,
        POTENTIAL_LOYALISTS | NEW_CUSTOMERS => PRIORITY_GROWTH,
        AT_RISK => PRIORITY_HIGH_RISK,
        _ => PRIORITY_LOW_ENGAGEMENT,
    }
}

/// Segments the rule table can emit whose priority does not match their
/// name's obvious intent. Reported at build time.
pub fn rollup_mismatches() -> Vec<&'static str> {
    SEGMENT_RULES
        .iter()
        .map(|r| r.segment)
        .filter(|s| *s == HIGH_RISK && segment_priority(s) != PRIORITY_HIGH_RISK)
        .collect()
}

/// The rule table, or a Rhai script when a path is given.
pub fn create_segmenter(script: Option<&Path>) -> Result<Box<dyn Segmenter>> {
    match script {
        Some(path) => Ok(Box::new(RhaiSegmenter::from_file(path)?)),
        None => Ok(Box::new(RuleTableSegmenter)),
    }
}
