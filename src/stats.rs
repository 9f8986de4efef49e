use serde::Serialize;
use statrs::statistics::{Data, OrderStatistics};

/// Median of a slice, averaging the two middle values for even lengths.
/// Returns 0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Data::new(values.to_vec()).median()
}

/// Summary of an expression level distribution, reported alongside the histogram data
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSummary {
    pub transcripts: usize,
    pub zero_levels: usize,
    pub mean: f64,
    pub median: f64,
    pub max: u64,
    /// Same figures with zero levels left out
    pub nonzero_mean: f64,
    pub nonzero_median: f64,
}

pub fn summarize_levels(levels: &[u64]) -> LevelSummary {
    let all: Vec<f64> = levels.iter().map(|&l| l as f64).collect();
    let nonzero: Vec<f64> = all.iter().copied().filter(|&l| l > 0.0).collect();
    let mean_of = |v: &[f64]| {
        if v.is_empty() {
            0.0
        } else {
            v.iter().sum::<f64>() / v.len() as f64
        }
    };

    LevelSummary {
        transcripts: levels.len(),
        zero_levels: levels.len() - nonzero.len(),
        mean: mean_of(&all),
        median: median(&all),
        max: levels.iter().copied().max().unwrap_or(0),
        nonzero_mean: mean_of(&nonzero),
        nonzero_median: median(&nonzero),
    }
}
