use ndarray::Array1;

use crate::context::RunContext;
use crate::frags::aggregate::ExpressionCounts;
use crate::io::fasta::Reference;
use crate::stats::{median, summarize_levels};

pub use crate::stats::LevelSummary;

/// Per transcript expression levels, in reference order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionLevels {
    /// GC bias corrected levels
    pub corrected: Vec<(String, u64)>,
    /// Levels with one uniform correction for every bucket
    pub flat: Vec<(String, u64)>,
}

/// Amplification weights `(1 / (e + 1))^n` scaled so the best amplified bucket gets 1.
///
/// Also returns the flat multiplier `median(raw) / min(raw)`.
pub fn efficiency_weights(ppr: &Array1<f64>, nr_cycles: u32) -> (Array1<f64>, f64) {
    let raw = ppr.mapv(|e| (1.0 / (e + 1.0)).powi(nr_cycles as i32));
    let min_raw = raw.iter().copied().fold(f64::INFINITY, f64::min);
    if !(min_raw > 0.0) || !min_raw.is_finite() {
        return (Array1::ones(raw.len()), 1.0);
    }
    let flat_mul = median(&raw.to_vec()) / min_raw;
    (raw / min_raw, flat_mul)
}

fn ceil_level(level: f64) -> u64 {
    if level.is_finite() && level > 0.0 {
        level.ceil() as u64
    } else {
        0
    }
}

impl ExpressionLevels {
    /// # Arguments
    /// * `reference` - transcripts to report, in output order
    /// * `counts` - GC bucketed fragment counts of every transcript
    /// * `ppr` - empirical efficiency of every GC bucket
    /// * `expr_mul` - scale applied to the per-base fragment density
    pub fn estimate(
        reference: &Reference,
        counts: &ExpressionCounts,
        nr_cycles: u32,
        ppr: &Array1<f64>,
        expr_mul: f64,
        ctx: &RunContext,
    ) -> Self {
        ctx.vlog("Estimating expression levels");
        let (weights, flat_mul) = efficiency_weights(ppr, nr_cycles);

        let mut corrected = Vec::with_capacity(reference.len());
        let mut flat = Vec::with_capacity(reference.len());
        for (name, seq) in reference.iter() {
            let length = seq.len() as f64;
            let (c_level, f_level) = match counts.get(name) {
                Some(c) if length > 0.0 => {
                    let weighted: f64 = c.iter().zip(weights.iter()).map(|(&n, &w)| n / length * w).sum();
                    let density: f64 = c.iter().map(|&n| n / length).sum();
                    (weighted * expr_mul, density * flat_mul * expr_mul)
                }
                _ => (0.0, 0.0),
            };
            corrected.push((name.to_string(), ceil_level(c_level)));
            flat.push((name.to_string(), ceil_level(f_level)));
        }

        ExpressionLevels { corrected, flat }
    }

    pub fn corrected_of(&self, name: &str) -> Option<u64> {
        self.corrected.iter().find(|(n, _)| n == name).map(|&(_, l)| l)
    }

    pub fn flat_of(&self, name: &str) -> Option<u64> {
        self.flat.iter().find(|(n, _)| n == name).map(|&(_, l)| l)
    }

    pub fn corrected_summary(&self) -> LevelSummary {
        let levels: Vec<u64> = self.corrected.iter().map(|&(_, l)| l).collect();
        summarize_levels(&levels)
    }

    pub fn flat_summary(&self) -> LevelSummary {
        let levels: Vec<u64> = self.flat.iter().map(|&(_, l)| l).collect();
        summarize_levels(&levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frags::GC_BINS;

    fn counts_at(bucket: usize, n: f64) -> Vec<f64> {
        let mut v = vec![0.0; GC_BINS];
        v[bucket] = n;
        v
    }

    #[test]
    fn test_weights_anchor_best_bucket() {
        let mut ppr = Array1::<f64>::from_elem(GC_BINS, 0.5);
        ppr[10] = 0.9;
        let (w, flat_mul) = efficiency_weights(&ppr, 10);

        // Lowest raw weight belongs to the best amplified bucket
        assert!((w[10] - 1.0).abs() < 1e-12);
        let expected = (1.9f64 / 1.5).powi(10);
        assert!((w[0] - expected).abs() < 1e-9);
        assert!((flat_mul - expected).abs() < 1e-9);
    }

    #[test]
    fn test_levels_proportional_and_zero() {
        let mut reference = Reference::new();
        reference.insert("tr1", &"A".repeat(100));
        reference.insert("tr2", &"A".repeat(100));
        reference.insert("empty", &"A".repeat(100));
        reference.insert("absent", &"A".repeat(100));

        let mut counts = ExpressionCounts::new();
        counts.insert("tr1".to_string(), counts_at(50, 10.0));
        counts.insert("tr2".to_string(), counts_at(50, 30.0));
        counts.insert("empty".to_string(), vec![0.0; GC_BINS]);

        let ppr = Array1::<f64>::from_elem(GC_BINS, 0.87);
        let ctx = RunContext::default();
        let levels = ExpressionLevels::estimate(&reference, &counts, 11, &ppr, 10000.0, &ctx);

        assert_eq!(levels.corrected_of("tr1"), Some(1000));
        assert_eq!(levels.corrected_of("tr2"), Some(3000));
        assert_eq!(levels.flat_of("tr2"), Some(3000));
        assert_eq!(levels.corrected_of("empty"), Some(0));
        assert_eq!(levels.flat_of("empty"), Some(0));
        assert_eq!(levels.corrected_of("absent"), Some(0));
        assert_eq!(levels.flat_of("absent"), Some(0));

        let names: Vec<&str> = levels.corrected.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["tr1", "tr2", "empty", "absent"]);

        let summary = levels.corrected_summary();
        assert_eq!(summary.zero_levels, 2);
        assert_eq!(summary.max, 3000);
    }

    #[test]
    fn test_correction_boosts_poorly_amplified_buckets() {
        let mut reference = Reference::new();
        reference.insert("low_gc", &"A".repeat(100));
        reference.insert("high_gc", &"G".repeat(100));

        let mut counts = ExpressionCounts::new();
        counts.insert("low_gc".to_string(), counts_at(20, 10.0));
        counts.insert("high_gc".to_string(), counts_at(80, 10.0));

        let mut ppr = Array1::<f64>::from_elem(GC_BINS, 0.9);
        ppr[80] = 0.6;
        let ctx = RunContext::default();
        let levels = ExpressionLevels::estimate(&reference, &counts, 10, &ppr, 100.0, &ctx);

        let low = levels.corrected_of("low_gc").unwrap();
        let high = levels.corrected_of("high_gc").unwrap();
        assert_eq!(low, 10);
        assert!(high > low);
        // Flat correction treats both transcripts the same
        assert_eq!(levels.flat_of("low_gc"), levels.flat_of("high_gc"));
    }
}
