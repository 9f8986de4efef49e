//! Maximum likelihood fits of the fragment size distribution.
//!
//! Two families compete: a normal truncated to the observed size range and
//! an untruncated skew normal. Sizes are weighted by their fragment counts;
//! sizes with zero or undefined density are left out of the likelihood
//! rather than penalized.

use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::config::FragSizeFamily;
use crate::context::RunContext;
use crate::error::Result;
use crate::frags::aggregate::FragCounts;
use crate::model::optimize::{NelderMead, OptimResult};

/// Parameter counts used in the AIC, support bounds included for the truncated normal.
pub const TRUNC_NORMAL_NR_PARAMS: usize = 4;
pub const SKEW_NORMAL_NR_PARAMS: usize = 3;

/// Mass of `normal` on `[low, high]`. An interval right of the mean is
/// mirrored into the left tail, where the CDF keeps its precision.
fn normal_mass(normal: &Normal, mean: f64, low: f64, high: f64) -> f64 {
    if low > mean {
        normal.cdf(2.0 * mean - low) - normal.cdf(2.0 * mean - high)
    } else {
        normal.cdf(high) - normal.cdf(low)
    }
}

/// Log density of a normal truncated to `[low, high]`.
/// Returns `-inf` for an invalid sd or when the truncation interval carries no mass.
pub fn tnorm_log_pdf(x: f64, mean: f64, sd: f64, low: f64, high: f64) -> f64 {
    let normal = match Normal::new(mean, sd) {
        Ok(normal) => normal,
        Err(_) => return f64::NEG_INFINITY,
    };
    let mass = normal_mass(&normal, mean, low, high);
    if !(mass > 0.0) || x < low || x > high {
        return f64::NEG_INFINITY;
    }
    normal.ln_pdf(x) - mass.ln()
}

/// Skew normal density `2/scale * phi(z) * Phi(shape * z)`
pub fn snorm_pdf(x: f64, loc: f64, scale: f64, shape: f64) -> f64 {
    match Normal::new(loc, scale) {
        // Phi(shape * z) is the location-scale CDF at loc + shape * (x - loc)
        Ok(normal) => 2.0 * normal.pdf(x) * normal.cdf(loc + shape * (x - loc)),
        Err(_) => 0.0,
    }
}

pub fn calc_aic(log_lik: f64, nr_params: usize) -> f64 {
    2.0 * nr_params as f64 - 2.0 * log_lik
}

/// Weighted observations of the size marginal over `[low, high]`
#[derive(Debug, Clone)]
pub struct SizeObservations {
    pub low: usize,
    pub high: usize,
    pub sizes: Vec<f64>,
    pub weights: Vec<f64>,
}

impl SizeObservations {
    pub fn from_counts(frags: &FragCounts) -> Self {
        let (low, high) = (frags.min_size, frags.max_size);
        let counts = frags.size_counts();
        SizeObservations {
            low,
            high,
            sizes: (low..=high).map(|s| s as f64).collect(),
            weights: (low..=high).map(|s| counts[s]).collect(),
        }
    }

    /// Weighted mean and standard deviation, used as the optimizer seed
    pub fn moments(&self) -> (f64, f64) {
        let total: f64 = self.weights.iter().sum();
        if total <= 0.0 {
            return (0.0, 0.0);
        }
        let mean = self
            .sizes
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            / total;
        let var = self
            .sizes
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| w * (x - mean).powi(2))
            .sum::<f64>()
            / total;
        (mean, var.sqrt())
    }

    /// Sum of `weight * log_density` over points whose log density is finite.
    /// Also returns how many points contributed.
    fn log_lik_with<F: Fn(f64) -> f64>(&self, log_density: F) -> (f64, usize) {
        let mut total = 0.0;
        let mut used = 0;
        for (&x, &w) in self.sizes.iter().zip(&self.weights) {
            let ld = log_density(x);
            if ld > f64::NEG_INFINITY && !ld.is_nan() {
                total += ld * w;
                used += 1;
            }
        }
        (total, used)
    }

    pub fn tnorm_log_lik(&self, mean: f64, sd: f64) -> f64 {
        let (low, high) = (self.low as f64, self.high as f64);
        self.log_lik_with(|x| tnorm_log_pdf(x, mean, sd, low, high)).0
    }

    pub fn snorm_log_lik(&self, loc: f64, scale: f64, shape: f64) -> f64 {
        self.log_lik_with(|x| {
            let pdf = snorm_pdf(x, loc, scale, shape);
            if pdf > 0.0 {
                pdf.ln()
            } else {
                f64::NEG_INFINITY
            }
        })
        .0
    }

    fn tnorm_cost(&self, p: &[f64]) -> f64 {
        let (mean, sd) = (p[0], p[1]);
        if !(sd > 0.0) || !mean.is_finite() || !sd.is_finite() {
            return f64::INFINITY;
        }
        let (low, high) = (self.low as f64, self.high as f64);
        let (l, used) = self.log_lik_with(|x| tnorm_log_pdf(x, mean, sd, low, high));
        if used == 0 {
            f64::INFINITY
        } else {
            -l
        }
    }

    fn snorm_cost(&self, p: &[f64]) -> f64 {
        let (loc, scale, shape) = (p[0], p[1], p[2]);
        if !(scale > 0.0) || !p.iter().all(|v| v.is_finite()) {
            return f64::INFINITY;
        }
        let (l, used) = self.log_lik_with(|x| {
            let pdf = snorm_pdf(x, loc, scale, shape);
            if pdf > 0.0 {
                pdf.ln()
            } else {
                f64::NEG_INFINITY
            }
        });
        if used == 0 {
            f64::INFINITY
        } else {
            -l
        }
    }
}

/// Normal distribution truncated to the observed size range
#[derive(Debug, Clone)]
pub struct TruncNormalFit {
    pub mean: f64,
    pub sd: f64,
    pub low: usize,
    pub high: usize,
    pub log_lik: f64,
    pub fit: OptimResult,
}

impl TruncNormalFit {
    pub fn fit(obs: &SizeObservations, ctx: &RunContext) -> Self {
        ctx.vlog("Estimating fragment size distribution (truncated normal)");
        let (m, s) = obs.moments();
        let fit = NelderMead::new().minimize(|p| obs.tnorm_cost(p), &[m, s]);
        let (mean, sd) = (fit.x[0], fit.x[1]);
        let log_lik = obs.tnorm_log_lik(mean, sd);

        ctx.vlog(&format!("Estimated mean fragment length: {}", mean as i64));
        ctx.vlog(&format!(
            "Estimated fragment length standard deviation: {}",
            sd as i64
        ));
        if !fit.converged {
            ctx.warn("Truncated normal fit stopped at the evaluation ceiling");
        }
        TruncNormalFit {
            mean,
            sd,
            low: obs.low,
            high: obs.high,
            log_lik,
            fit,
        }
    }

    pub fn aic(&self) -> f64 {
        calc_aic(self.log_lik, TRUNC_NORMAL_NR_PARAMS)
    }

    pub fn suggestion(&self) -> String {
        format!(
            "-d \"1.0:n:({},{},{},{})\"",
            self.mean as i64, self.sd as i64, self.low, self.high
        )
    }
}

/// Skew normal distribution, untruncated
#[derive(Debug, Clone)]
pub struct SkewNormalFit {
    pub loc: f64,
    pub scale: f64,
    pub shape: f64,
    pub low: usize,
    pub high: usize,
    pub log_lik: f64,
    pub fit: OptimResult,
}

impl SkewNormalFit {
    pub fn fit(obs: &SizeObservations, ctx: &RunContext) -> Self {
        ctx.vlog("Estimating fragment size distribution (skew normal)");
        let (m, s) = obs.moments();
        let fit = NelderMead::new().minimize(|p| obs.snorm_cost(p), &[m, s, 1.0]);
        let (loc, scale, shape) = (fit.x[0], fit.x[1], fit.x[2]);
        let log_lik = obs.snorm_log_lik(loc, scale, shape);

        ctx.vlog(&format!("Estimated location parameter: {}", loc as i64));
        ctx.vlog(&format!("Estimated scale parameter: {}", scale as i64));
        ctx.vlog(&format!("Estimated shape parameter: {}", shape));
        if !fit.converged {
            ctx.warn("Skew normal fit stopped at the evaluation ceiling");
        }
        SkewNormalFit {
            loc,
            scale,
            shape,
            low: obs.low,
            high: obs.high,
            log_lik,
            fit,
        }
    }

    pub fn aic(&self) -> f64 {
        calc_aic(self.log_lik, SKEW_NORMAL_NR_PARAMS)
    }

    pub fn suggestion(&self) -> String {
        format!(
            "-d \"1.0:sn:({}, {}, {}, {}, {})\"",
            self.loc as i64, self.scale as i64, self.shape, self.low, self.high
        )
    }
}

/// The fitted size model chosen for the simulator
#[derive(Debug, Clone)]
pub enum FragSizeModel {
    TruncatedNormal(TruncNormalFit),
    SkewNormal(SkewNormalFit),
}

impl FragSizeModel {
    pub fn family(&self) -> &'static str {
        match self {
            FragSizeModel::TruncatedNormal(_) => "truncated_normal",
            FragSizeModel::SkewNormal(_) => "skew_normal",
        }
    }

    pub fn params(&self) -> Vec<f64> {
        match self {
            FragSizeModel::TruncatedNormal(n) => vec![n.mean, n.sd, n.low as f64, n.high as f64],
            FragSizeModel::SkewNormal(s) => {
                vec![s.loc, s.scale, s.shape, s.low as f64, s.high as f64]
            }
        }
    }

    pub fn log_lik(&self) -> f64 {
        match self {
            FragSizeModel::TruncatedNormal(n) => n.log_lik,
            FragSizeModel::SkewNormal(s) => s.log_lik,
        }
    }

    pub fn aic(&self) -> f64 {
        match self {
            FragSizeModel::TruncatedNormal(n) => n.aic(),
            FragSizeModel::SkewNormal(s) => s.aic(),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            FragSizeModel::TruncatedNormal(n) => n.suggestion(),
            FragSizeModel::SkewNormal(s) => s.suggestion(),
        }
    }
}

/// Every fit performed plus the selected model
#[derive(Debug, Clone)]
pub struct FragDistFit {
    pub trunc_normal: Option<TruncNormalFit>,
    pub skew_normal: Option<SkewNormalFit>,
    pub selected: FragSizeModel,
}

/// Keep the skew normal only when its AIC is strictly lower.
pub fn select_by_aic(n: TruncNormalFit, sn: SkewNormalFit) -> FragSizeModel {
    if sn.aic() < n.aic() {
        FragSizeModel::SkewNormal(sn)
    } else {
        FragSizeModel::TruncatedNormal(n)
    }
}

/// Fit a model on the fragment size distribution.
pub fn fit_fragdist(frags: &FragCounts, family: FragSizeFamily, ctx: &RunContext) -> Result<FragDistFit> {
    let obs = SizeObservations::from_counts(frags);

    let result = match family {
        FragSizeFamily::TruncatedNormal => {
            let n = TruncNormalFit::fit(&obs, ctx);
            FragDistFit {
                trunc_normal: Some(n.clone()),
                skew_normal: None,
                selected: FragSizeModel::TruncatedNormal(n),
            }
        }
        FragSizeFamily::SkewNormal => {
            let sn = SkewNormalFit::fit(&obs, ctx);
            FragDistFit {
                trunc_normal: None,
                skew_normal: Some(sn.clone()),
                selected: FragSizeModel::SkewNormal(sn),
            }
        }
        FragSizeFamily::Auto => {
            // The two fits share nothing mutable
            let (n, sn) = rayon::join(
                || TruncNormalFit::fit(&obs, ctx),
                || SkewNormalFit::fit(&obs, ctx),
            );
            let (n_aic, sn_aic) = (n.aic(), sn.aic());
            ctx.vlog(&format!("Truncated normal AIC: {}", n_aic));
            ctx.vlog(&format!("Skew normal AIC: {}", sn_aic));
            ctx.vlog(&format!("Absolute AIC difference: {}", (sn_aic - n_aic).abs()));
            FragDistFit {
                trunc_normal: Some(n.clone()),
                skew_normal: Some(sn.clone()),
                selected: select_by_aic(n, sn),
            }
        }
    };
    Ok(result)
}
