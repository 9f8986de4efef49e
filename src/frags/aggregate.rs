use std::collections::BTreeMap;

use ndarray::{Array1, Array2, Axis};

use crate::context::RunContext;
use crate::error::{EffestError, Result};
use crate::frags::{gc_bucket, GC_BINS};
use crate::io::fasta::Reference;
use crate::io::isoforms::SingleIsoformList;
use crate::io::sam::MatePair;

/// Transcript name -> GC bucketed fragment counts (length [`GC_BINS`]).
pub type ExpressionCounts = BTreeMap<String, Vec<f64>>;

/// A fragment reconstructed from a properly paired read pair
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub chrom: String,
    pub start: usize,
    pub end: usize,
    pub size: usize,
    /// '+' when the first mate maps upstream of the second
    pub strand: char,
    pub gc: f64,
}

impl Fragment {
    pub fn gc_bucket(&self) -> usize {
        gc_bucket(self.gc)
    }
}

/// Tally of why read pairs were dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub pairs: u64,
    pub missing_mate: u64,
    pub improper_pair: u64,
    pub unaligned: u64,
    pub reference_mismatch: u64,
    /// Pairs whose mates span no reference bases
    pub empty_span: u64,
    pub low_quality: u64,
    pub accepted: u64,
}

/// Aggregated fragment statistics.
///
/// Built once per run, either from an alignment or from a stored record,
/// and treated as immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct FragCounts {
    /// Joint count matrix indexed by [size, gc bucket], single isoform fragments only
    pub frag_mat: Array2<f64>,
    pub min_size: usize,
    pub max_size: usize,
    /// Per transcript counts from all fragments
    pub expr_levels: ExpressionCounts,
    pub total_frags: f64,
    pub size_marg: Array1<f64>,
    pub gc_marg: Array1<f64>,
}

impl FragCounts {
    /// Derive totals and marginals from the joint matrix.
    ///
    /// Fails when the matrix holds no fragments, since marginals and the
    /// size range are undefined then.
    pub fn new(
        frag_mat: Array2<f64>,
        min_size: usize,
        max_size: usize,
        expr_levels: ExpressionCounts,
    ) -> Result<Self> {
        if frag_mat.ncols() != GC_BINS {
            return Err(EffestError::Schema(format!(
                "joint count matrix has {} GC columns, expected {}",
                frag_mat.ncols(),
                GC_BINS
            )));
        }
        if let Some((name, v)) = expr_levels.iter().find(|(_, v)| v.len() != GC_BINS) {
            return Err(EffestError::Schema(format!(
                "expression counts of {} have {} buckets, expected {}",
                name,
                v.len(),
                GC_BINS
            )));
        }
        let total_frags = frag_mat.sum();
        if total_frags <= 0.0 {
            return Err(EffestError::EmptyFragments);
        }
        if min_size > max_size || max_size >= frag_mat.nrows() {
            return Err(EffestError::Schema(format!(
                "fragment size range {}..{} does not fit a matrix with {} rows",
                min_size,
                max_size,
                frag_mat.nrows()
            )));
        }

        let size_marg = frag_mat.sum_axis(Axis(1)) / total_frags;
        let gc_marg = frag_mat.sum_axis(Axis(0)) / total_frags;

        Ok(FragCounts {
            frag_mat,
            min_size,
            max_size,
            expr_levels,
            total_frags,
            size_marg,
            gc_marg,
        })
    }

    /// Number of fragments from all transcripts
    pub fn all_frags(&self) -> f64 {
        self.expr_levels.values().map(|v| v.iter().sum::<f64>()).sum()
    }

    /// Fragment counts per size, summed over GC buckets
    pub fn size_counts(&self) -> Array1<f64> {
        self.frag_mat.sum_axis(Axis(1))
    }

    /// Total expression of one transcript, zero when it has no fragments
    pub fn expression_of(&self, name: &str) -> f64 {
        self.expr_levels
            .get(name)
            .map(|v| v.iter().sum())
            .unwrap_or(0.0)
    }
}

/// Turns a stream of mate pairs into [`FragCounts`].
pub struct FragmentAggregator<'a> {
    reference: &'a Reference,
    single_isoforms: &'a SingleIsoformList,
    min_qual: u8,
    ctx: &'a RunContext,
}

impl<'a> FragmentAggregator<'a> {
    pub fn new(
        reference: &'a Reference,
        single_isoforms: &'a SingleIsoformList,
        min_qual: u8,
        ctx: &'a RunContext,
    ) -> Self {
        FragmentAggregator {
            reference,
            single_isoforms,
            min_qual,
            ctx,
        }
    }

    /// Apply the pair filters in order and build the fragment of a surviving pair.
    ///
    /// Returns `Ok(None)` for silently dropped pairs; an unpaired mate is fatal.
    pub fn fragment(&self, pair: &MatePair, stats: &mut FilterStats) -> Result<Option<Fragment>> {
        stats.pairs += 1;
        let (first, second) = match (&pair.first, &pair.second) {
            (Some(f), Some(s)) => (f, s),
            _ => {
                stats.missing_mate += 1;
                return Ok(None);
            }
        };

        if !first.paired_end || !second.paired_end {
            return Err(self
                .ctx
                .fatal_err(EffestError::Pairing("Unpaired read found in alignment!".to_string())));
        }
        if !first.proper_pair || !second.proper_pair {
            stats.improper_pair += 1;
            return Ok(None);
        }
        if !first.aligned || !second.aligned {
            stats.unaligned += 1;
            return Ok(None);
        }
        if first.reference_name != second.reference_name {
            stats.reference_mismatch += 1;
            return Ok(None);
        }
        if first.mapping_quality < self.min_qual || second.mapping_quality < self.min_qual {
            stats.low_quality += 1;
            return Ok(None);
        }

        let chrom = &first.reference_name;
        let (start, end, strand) = if first.interval.start < second.interval.start {
            (first.interval.start, second.interval.end, '+')
        } else {
            (second.interval.start, first.interval.end, '-')
        };
        let size = end.saturating_sub(start);
        if size == 0 {
            stats.empty_span += 1;
            return Ok(None);
        }

        let seq = self
            .reference
            .get(chrom)
            .ok_or_else(|| self.ctx.fatal_err(EffestError::MissingReference(chrom.clone())))?;
        let bytes = seq.as_bytes();
        let slice = &bytes[start.min(bytes.len())..end.min(bytes.len())];
        let gc_count = slice.iter().filter(|&&b| b == b'G' || b == b'C').count();

        stats.accepted += 1;
        Ok(Some(Fragment {
            chrom: chrom.clone(),
            start,
            end,
            size,
            strand,
            gc: gc_count as f64 / size as f64,
        }))
    }

    /// Consume the pair stream in one pass and tabulate fragment statistics
    pub fn aggregate<I>(&self, pairs: I) -> Result<(FragCounts, FilterStats)>
    where
        I: IntoIterator<Item = Result<MatePair>>,
    {
        let mut stats = FilterStats::default();
        let mut rows: Vec<[f64; GC_BINS]> = Vec::new();
        let mut expr_levels = ExpressionCounts::new();
        let mut size_range: Option<(usize, usize)> = None;

        for pair in pairs {
            let pair = pair?;
            let frag = match self.fragment(&pair, &mut stats)? {
                Some(frag) => frag,
                None => continue,
            };
            let gc = frag.gc_bucket();

            // Only fragments of single isoform transcripts enter the joint table
            if self.single_isoforms.single_isoform(&frag.chrom) {
                if rows.len() <= frag.size {
                    rows.resize(frag.size + 1, [0.0; GC_BINS]);
                }
                rows[frag.size][gc] += 1.0;
                size_range = Some(match size_range {
                    None => (frag.size, frag.size),
                    Some((lo, hi)) => (lo.min(frag.size), hi.max(frag.size)),
                });
            }

            expr_levels
                .entry(frag.chrom)
                .or_insert_with(|| vec![0.0; GC_BINS])[gc] += 1.0;

            if stats.pairs % 1_000_000 == 0 {
                self.ctx.vlog(&format!("Processed {} read pairs...", stats.pairs));
            }
        }

        self.ctx.vlog(&format!(
            "Read pairs: {} (missing mate: {}, improper: {}, unaligned: {}, reference mismatch: {}, low quality: {}, empty span: {})",
            stats.pairs,
            stats.missing_mate,
            stats.improper_pair,
            stats.unaligned,
            stats.reference_mismatch,
            stats.low_quality,
            stats.empty_span
        ));

        let (min_size, max_size) = size_range.ok_or_else(|| self.ctx.fatal_err(EffestError::EmptyFragments))?;

        let mut frag_mat = Array2::<f64>::zeros((max_size + 1, GC_BINS));
        for (size, row) in rows.iter().enumerate() {
            for (gc, &count) in row.iter().enumerate() {
                frag_mat[[size, gc]] = count;
            }
        }

        let counts = FragCounts::new(frag_mat, min_size, max_size, expr_levels)?;
        self.ctx.log(&format!("Total number of fragments: {}", counts.all_frags()));
        self.ctx.log(&format!(
            "Total number of fragments from single isoform genes: {}",
            counts.total_frags
        ));
        Ok((counts, stats))
    }
}
