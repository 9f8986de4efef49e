use ndarray::Array1;
use ndarray_stats::QuantileExt;

use crate::config::EfficiencyReference;
use crate::context::RunContext;
use crate::error::{EffestError, Result};
use crate::frags::aggregate::FragCounts;
use crate::frags::prior::GcPrior;
use crate::frags::GC_BINS;
use crate::model::optimize::{NelderMead, OptimResult};

/// Parametric efficiency curve `b + (1 - b) * (1 - gc^a)^a` for gc in [0, 1].
pub fn gc_eff_func(gc: f64, a: f64, b: f64) -> f64 {
    b + (1.0 - b) * (1.0 - gc.powf(a)).powf(a)
}

/// GC fractions at the bucket centers 0, 0.01, ..., 1.
pub fn gc_grid() -> Array1<f64> {
    Array1::from_iter((0..GC_BINS).map(|g| g as f64 / 100.0))
}

/// Ratio of observed to expected fragment frequency per GC bucket.
///
/// The expectation weights the prior P(gc|size) by the size marginal; a
/// bucket with zero expectation gets a ratio of zero.
pub fn pseudo_ratio(frags: &FragCounts, prior: &GcPrior) -> Result<Array1<f64>> {
    let z = &frags.frag_mat;
    let gc_size_prior = &prior.prior;
    if gc_size_prior.dim() != z.dim() {
        return Err(EffestError::Schema(format!(
            "prior shape {:?} does not match fragment matrix shape {:?}",
            gc_size_prior.dim(),
            z.dim()
        )));
    }

    let total = frags.total_frags;
    let mut ratio = Array1::<f64>::zeros(GC_BINS);
    for gc in 0..GC_BINS {
        let mut joint_tmp = 0.0;
        let mut prior_tmp = 0.0;
        for size in 0..z.nrows() {
            joint_tmp += z[[size, gc]] / total;
            prior_tmp += frags.size_marg[size] * gc_size_prior[[size, gc]];
        }
        if prior_tmp > 0.0 {
            ratio[gc] = joint_tmp / prior_tmp;
        }
    }
    Ok(ratio)
}

/// Per-cycle scaling Δ in `ratio = ((1 + e) / Δ)^n`.
pub fn calculate_delta(ratio: &Array1<f64>, nr_cycles: u32, reference: EfficiencyReference) -> Result<f64> {
    let n = nr_cycles as f64;
    let delta = match reference {
        EfficiencyReference::Max(max_eff) => {
            let mut sorted = ratio.to_vec();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let top = &sorted[sorted.len().saturating_sub(9)..];
            let max_ratio = crate::stats::median(top);
            if !(max_ratio > 0.0) {
                return Err(EffestError::Fatal(
                    "No usable efficiency reference point: highest ratios are zero".to_string(),
                ));
            }
            (1.0 + max_eff) / (max_ratio.ln() / n).exp()
        }
        EfficiencyReference::Mean(mean_eff) => 1.0 + mean_eff,
    };
    if !delta.is_finite() || delta <= 0.0 {
        return Err(EffestError::Fatal(format!(
            "No usable efficiency reference point (delta = {})",
            delta
        )));
    }
    Ok(delta)
}

/// Invert the amplification equation bucket by bucket.
///
/// Zero ratios are replaced by the value that maps onto zero efficiency and
/// negative efficiencies are clamped to zero.
pub fn calculate_efficiencies(ratio: &Array1<f64>, nr_cycles: u32, delta: f64) -> Array1<f64> {
    let n = nr_cycles as f64;
    let zero_sub = (n * (1.0 / delta).ln()).exp();
    ratio.mapv(|r| {
        let r = if r == 0.0 { zero_sub } else { r };
        let e = (r.ln() / n).exp() * delta - 1.0;
        if e < 0.0 {
            0.0
        } else {
            e
        }
    })
}

/// Weighted squared error of the curve against empirical efficiencies.
/// Each point is weighted by `e * (1 - e)`, so near-0 and near-1 points count little.
pub fn curve_cost(params: &[f64], ppr: &Array1<f64>) -> Result<f64> {
    if ppr.len() != GC_BINS {
        return Err(EffestError::Schema("Data vector has wrong size!".to_string()));
    }
    let (a, b) = (params[0], params[1]);
    Ok(gc_grid()
        .iter()
        .zip(ppr.iter())
        .map(|(&gc, &e)| {
            let pred = gc_eff_func(gc, a, b);
            (pred - e).powi(2) * e * (1.0 - e)
        })
        .sum())
}

/// Fitted GC dependent efficiency model
#[derive(Debug, Clone)]
pub struct EfficiencyModel {
    pub nr_cycles: u32,
    pub reference: EfficiencyReference,
    pub delta: f64,
    /// Observed / expected frequency per GC bucket
    pub ratio: Array1<f64>,
    /// Empirical efficiencies
    pub ppr: Array1<f64>,
    /// Fitted curve `(a, b)`
    pub params: (f64, f64),
    /// Fitted curve evaluated at every bucket
    pub gc_effs: Array1<f64>,
    pub fit: OptimResult,
}

impl EfficiencyModel {
    pub fn fit(
        frags: &FragCounts,
        prior: &GcPrior,
        nr_cycles: u32,
        reference: EfficiencyReference,
        init_params: (f64, f64),
        ctx: &RunContext,
    ) -> Result<Self> {
        if nr_cycles == 0 {
            return Err(ctx.fatal_err(EffestError::Config(
                "Number of PCR cycles must be positive".to_string(),
            )));
        }
        ctx.vlog("Fitting GC dependent efficiency model");

        let ratio = pseudo_ratio(frags, prior).map_err(|e| ctx.fatal_err(e))?;
        let delta = calculate_delta(&ratio, nr_cycles, reference).map_err(|e| ctx.fatal_err(e))?;
        let ppr = calculate_efficiencies(&ratio, nr_cycles, delta);
        if ppr.len() != GC_BINS {
            return Err(ctx.fatal("Data vector has wrong size!"));
        }

        let optimizer = NelderMead::new().with_bounds(vec![(0.0, f64::INFINITY), (0.0, 1.0)]);
        let fit = optimizer.minimize(
            |p| curve_cost(p, &ppr).unwrap_or(f64::INFINITY),
            &[init_params.0, init_params.1],
        );
        let params = (fit.x[0], fit.x[1]);
        let gc_effs = gc_grid().mapv(|gc| gc_eff_func(gc, params.0, params.1));

        ctx.vlog(&format!(
            "Efficiency curve fit: a = {}, b = {} (converged: {}, iterations: {}, evaluations: {})",
            params.0, params.1, fit.converged, fit.iterations, fit.evaluations
        ));
        if !fit.converged {
            ctx.warn("Efficiency curve fit stopped at the evaluation ceiling");
        }

        Ok(EfficiencyModel {
            nr_cycles,
            reference,
            delta,
            ratio,
            ppr,
            params,
            gc_effs,
            fit,
        })
    }

    /// Highest fitted efficiency over all buckets
    pub fn max_fitted_eff(&self) -> f64 {
        *self.gc_effs.max_skipnan()
    }

    /// Simulator parameter suggestion for the fitted curve
    pub fn suggestion(&self) -> String {
        format!(
            "-eg \"({}, {}, {})\"",
            self.params.0,
            self.params.1,
            self.max_fitted_eff()
        )
    }
}
