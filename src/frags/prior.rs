use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;

use crate::context::RunContext;
use crate::error::{EffestError, Result};
use crate::frags::aggregate::FragCounts;
use crate::frags::{gc_bucket, GC_BINS};
use crate::io::fasta::Reference;
use crate::io::isoforms::SingleIsoformList;

/// Number of transcript chunks slid in parallel
const PRIOR_CHUNKS: usize = 64;

/// Empirical GC content prior P(gc | size).
#[derive(Debug, Clone, PartialEq)]
pub struct GcPrior {
    /// Indexed by [size, gc bucket]; each row sums to one or is all zero
    pub prior: Array2<f64>,
    pub gc_marg: Array1<f64>,
}

impl GcPrior {
    /// Build a prior from raw window counts: marginal first, then row normalization.
    pub fn from_counts(mut counts: Array2<f64>) -> Result<Self> {
        if counts.ncols() != GC_BINS {
            return Err(EffestError::Schema(format!(
                "prior has {} GC columns, expected {}",
                counts.ncols(),
                GC_BINS
            )));
        }
        let mut gc_marg = counts.sum_axis(Axis(0));
        let total = gc_marg.sum();
        if total > 0.0 {
            gc_marg /= total;
        }

        for mut row in counts.axis_iter_mut(Axis(0)) {
            let s = row.sum();
            if s != 0.0 {
                row /= s;
            }
        }

        Ok(GcPrior {
            prior: counts,
            gc_marg,
        })
    }
}

/// Count windows of every size in `[min_size, max_size]` sliding over one
/// transcript, each window adding `expr_level` to its GC bucket.
pub fn slide_transcript(
    seq: &[u8],
    expr_level: f64,
    min_size: usize,
    max_size: usize,
    step: usize,
    prior_counts: &mut Array2<f64>,
) {
    // Prefix sums make every window O(1)
    let mut gc_prefix = Vec::with_capacity(seq.len() + 1);
    gc_prefix.push(0usize);
    let mut acc = 0usize;
    for &b in seq {
        if b == b'G' || b == b'C' {
            acc += 1;
        }
        gc_prefix.push(acc);
    }

    for winsize in min_size.max(1)..=max_size {
        if seq.len() <= winsize {
            break;
        }
        let stride = winsize / step + 1;
        let last = seq.len() - winsize;
        let mut i = 0;
        while i < last {
            let gc = gc_prefix[i + winsize] - gc_prefix[i];
            let bucket = gc_bucket(gc as f64 / winsize as f64);
            prior_counts[[winsize, bucket]] += expr_level;
            i += stride;
        }
    }
}

/// Estimates [`GcPrior`] from expressed single isoform transcripts.
pub struct GcPriorEstimator<'a> {
    frags: &'a FragCounts,
    single_isoforms: &'a SingleIsoformList,
    reference: &'a Reference,
    step: usize,
    ctx: &'a RunContext,
}

impl<'a> GcPriorEstimator<'a> {
    pub fn new(
        frags: &'a FragCounts,
        single_isoforms: &'a SingleIsoformList,
        reference: &'a Reference,
        step: usize,
        ctx: &'a RunContext,
    ) -> Self {
        GcPriorEstimator {
            frags,
            single_isoforms,
            reference,
            step,
            ctx,
        }
    }

    pub fn estimate(&self) -> Result<GcPrior> {
        if self.step == 0 {
            return Err(self.ctx.fatal_err(EffestError::Config(
                "Sliding window step ratio must be at least 1".to_string(),
            )));
        }
        self.ctx.vlog("Calculating fragment prior");

        let transcripts: Vec<(&str, f64)> = self
            .reference
            .iter()
            .filter(|(name, _)| self.single_isoforms.single_isoform(name))
            .map(|(name, seq)| (seq, self.frags.expression_of(name)))
            .filter(|&(_, level)| level != 0.0)
            .collect();
        self.ctx.vlog(&format!(
            "Sliding windows over {} expressed single isoform transcripts",
            transcripts.len()
        ));

        let shape = (self.frags.max_size + 1, GC_BINS);
        let (min_size, max_size, step) = (self.frags.min_size, self.frags.max_size, self.step);

        // Chunk boundaries depend only on transcript order, and partial
        // matrices are summed in chunk order, so the result does not vary
        // with the thread count. Integer levels from aggregation also make
        // it equal to a single sequential pass.
        let chunk_len = ((transcripts.len() + PRIOR_CHUNKS - 1) / PRIOR_CHUNKS).max(1);
        let partials: Vec<Array2<f64>> = transcripts
            .par_chunks(chunk_len)
            .map(|chunk| {
                let mut acc = Array2::<f64>::zeros(shape);
                for &(seq, level) in chunk {
                    slide_transcript(seq.as_bytes(), level, min_size, max_size, step, &mut acc);
                }
                acc
            })
            .collect();
        let prior_counts = partials
            .into_iter()
            .fold(Array2::<f64>::zeros(shape), |acc, part| acc + part);

        GcPrior::from_counts(prior_counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frags::aggregate::ExpressionCounts;

    fn counts_for(names: &[(&str, f64)], min_size: usize, max_size: usize) -> FragCounts {
        let mut mat = Array2::<f64>::zeros((max_size + 1, GC_BINS));
        mat[[min_size, 50]] = 1.0;
        mat[[max_size, 50]] = 1.0;
        let mut expr = ExpressionCounts::new();
        for &(name, level) in names {
            let mut v = vec![0.0; GC_BINS];
            v[50] = level;
            expr.insert(name.to_string(), v);
        }
        FragCounts::new(mat, min_size, max_size, expr).unwrap()
    }

    #[test]
    fn test_slide_offsets_and_stride() {
        // Length 10, window 4, step 5 -> stride 1, offsets 0..=5
        let mut counts = Array2::<f64>::zeros((5, GC_BINS));
        slide_transcript(b"GGGGAAAAAA", 2.0, 4, 4, 5, &mut counts);
        assert_eq!(counts.row(4).sum(), 12.0);
        assert_eq!(counts[[4, 100]], 2.0);
        assert_eq!(counts[[4, 75]], 2.0);
        assert_eq!(counts[[4, 0]], 4.0);

        // Window 4, step 1 -> stride 5, offsets 0 and 5
        let mut counts = Array2::<f64>::zeros((5, GC_BINS));
        slide_transcript(b"GGGGAAAAAAA", 1.0, 4, 4, 1, &mut counts);
        assert_eq!(counts.row(4).sum(), 2.0);
        assert_eq!(counts[[4, 100]], 1.0);
        assert_eq!(counts[[4, 0]], 1.0);
    }

    #[test]
    fn test_prior_rows_normalized() {
        let mut reference = Reference::new();
        reference.insert("tr1", &"ACGTTA".repeat(20));
        reference.insert("tr2", &"GGCATG".repeat(20));
        reference.insert("silent", &"GGGGGG".repeat(20));
        let frags = counts_for(&[("tr1", 3.0), ("tr2", 1.0)], 10, 30);
        let iso = SingleIsoformList::all();
        let ctx = RunContext::default();

        let prior = GcPriorEstimator::new(&frags, &iso, &reference, 5, &ctx)
            .estimate()
            .unwrap();

        assert_eq!(prior.prior.nrows(), 31);
        for (size, row) in prior.prior.axis_iter(Axis(0)).enumerate() {
            let s = row.sum();
            if size < 10 {
                assert_eq!(s, 0.0);
                assert!(row.iter().all(|&v| v == 0.0));
            } else {
                assert!((s - 1.0).abs() < 1e-9, "row {} sums to {}", size, s);
            }
        }
        assert!((prior.gc_marg.sum() - 1.0).abs() < 1e-9);
        // The unexpressed all-GC transcript contributes nothing
        assert_eq!(prior.gc_marg[100], 0.0);
    }

    #[test]
    fn test_parallel_prior_matches_sequential_pass() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let mut reference = Reference::new();
        let mut levels = Vec::new();
        for t in 0..12 {
            let len = rng.gen_range(40..120);
            let seq: String = (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)] as char).collect();
            let name = format!("tr{}", t);
            reference.insert(&name, &seq);
            levels.push((name, rng.gen_range(1..20) as f64));
        }
        let named: Vec<(&str, f64)> = levels.iter().map(|(n, l)| (n.as_str(), *l)).collect();
        let frags = counts_for(&named, 15, 35);
        let iso = SingleIsoformList::all();
        let ctx = RunContext::default();

        let prior = GcPriorEstimator::new(&frags, &iso, &reference, 3, &ctx)
            .estimate()
            .unwrap();

        let mut sequential = Array2::<f64>::zeros((36, GC_BINS));
        for (name, seq) in reference.iter() {
            slide_transcript(seq.as_bytes(), frags.expression_of(name), 15, 35, 3, &mut sequential);
        }
        assert_eq!(prior, GcPrior::from_counts(sequential).unwrap());
    }

    #[test]
    fn test_prior_independent_of_thread_count() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(11);
        let mut reference = Reference::new();
        let mut levels = Vec::new();
        for t in 0..300 {
            let len = rng.gen_range(40..90);
            let seq: String = (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)] as char).collect();
            let name = format!("tr{}", t);
            reference.insert(&name, &seq);
            // Fractional levels make the sum depend on association order
            levels.push((name, rng.gen_range(0.1..3.0)));
        }
        let named: Vec<(&str, f64)> = levels.iter().map(|(n, l)| (n.as_str(), *l)).collect();
        let frags = counts_for(&named, 15, 35);
        let iso = SingleIsoformList::all();
        let ctx = RunContext::default();

        let estimate_with = |threads: usize| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| GcPriorEstimator::new(&frags, &iso, &reference, 3, &ctx).estimate())
                .unwrap()
        };
        let single = estimate_with(1);
        assert_eq!(estimate_with(4), single);
        assert_eq!(estimate_with(7), single);
    }

    #[test]
    fn test_prior_skips_non_single_isoforms() {
        let mut reference = Reference::new();
        reference.insert("tr1", &"AT".repeat(50));
        reference.insert("tr2", &"GC".repeat(50));
        let frags = counts_for(&[("tr1", 1.0), ("tr2", 1.0)], 10, 12);
        let iso = SingleIsoformList::from_names(vec!["tr1"]);
        let ctx = RunContext::default();

        let prior = GcPriorEstimator::new(&frags, &iso, &reference, 5, &ctx)
            .estimate()
            .unwrap();
        assert_eq!(prior.prior[[10, 0]], 1.0);
        assert_eq!(prior.gc_marg[0], 1.0);
    }
}
