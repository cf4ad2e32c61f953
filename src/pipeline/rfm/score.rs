use crate::config::ScoreBands;

/// Recency, frequency and monetary scores, each 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RfmScores {
    pub recency: u8,
    pub frequency: u8,
    pub monetary: u8,
}

impl RfmScores {
    pub fn new(recency: u8, frequency: u8, monetary: u8) -> Self {
        Self {
            recency,
            frequency,
            monetary,
        }
    }

    /// The three digits concatenated, e.g. `"543"`.
    pub fn code(&self) -> String {
        format!("{}{}{}", self.recency, self.frequency, self.monetary)
    }
}

/// Score from four bands checked top-down; the first hit scores 5, the
/// next 4 and so on, a miss scores 1.
fn banded(hits: impl IntoIterator<Item = bool>) -> u8 {
    hits.into_iter()
        .position(|hit| hit)
        .map(|i| 5 - i as u8)
        .unwrap_or(1)
}

impl ScoreBands {
    pub fn recency_score(&self, days: i64) -> u8 {
        banded(self.recency_days.iter().map(|&max| days <= max))
    }

    pub fn frequency_score(&self, invoices: i64) -> u8 {
        banded(self.frequency.iter().map(|&min| invoices >= min))
    }

    pub fn monetary_score(&self, revenue: f64) -> u8 {
        banded(self.monetary.iter().map(|&min| revenue >= min))
    }

    pub fn score(&self, recency_days: i64, frequency: i64, monetary: f64) -> RfmScores {
        RfmScores {
            recency: self.recency_score(recency_days),
            frequency: self.frequency_score(frequency),
            monetary: self.monetary_score(monetary),
        }
    }
}
