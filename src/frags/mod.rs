//! Fragment tabulation - joint size x GC counts and the GC content prior
pub mod aggregate;
pub mod prior;

/// Number of integer GC percentage buckets, 0 through 100.
pub const GC_BINS: usize = 101;

/// Map a GC fraction onto its integer percentage bucket.
pub fn gc_bucket(gc_fraction: f64) -> usize {
    let bucket = (gc_fraction * 100.0).floor();
    if bucket.is_nan() || bucket < 0.0 {
        0
    } else {
        (bucket as usize).min(GC_BINS - 1)
    }
}
