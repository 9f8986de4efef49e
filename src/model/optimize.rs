//! Derivative-free minimization with the Nelder-Mead simplex method.
//!
//! Every optimizer run is bounded by an iteration and an evaluation ceiling,
//! so termination is guaranteed even when the simplex never collapses.

/// Hard ceiling on iterations and function evaluations.
pub const MAX_STEPS: usize = 1_000_000;

/// Outcome of one minimization run
#[derive(Debug, Clone, PartialEq)]
pub struct OptimResult {
    pub x: Vec<f64>,
    pub fun: f64,
    pub iterations: usize,
    pub evaluations: usize,
    /// Whether the simplex met both tolerances before a ceiling was hit
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct NelderMead {
    pub max_iter: usize,
    pub max_fev: usize,
    pub xatol: f64,
    pub fatol: f64,
    /// Optional box constraints, one `(lower, upper)` per coordinate
    pub bounds: Option<Vec<(f64, f64)>>,
}

impl Default for NelderMead {
    fn default() -> Self {
        NelderMead {
            max_iter: MAX_STEPS,
            max_fev: MAX_STEPS,
            xatol: 1e-4,
            fatol: 1e-4,
            bounds: None,
        }
    }
}

const RHO: f64 = 1.0;
const CHI: f64 = 2.0;
const PSI: f64 = 0.5;
const SIGMA: f64 = 0.5;

impl NelderMead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bounds(mut self, bounds: Vec<(f64, f64)>) -> Self {
        self.bounds = Some(bounds);
        self
    }

    fn project(&self, x: &mut [f64]) {
        if let Some(bounds) = &self.bounds {
            for (v, &(lo, hi)) in x.iter_mut().zip(bounds.iter()) {
                *v = v.clamp(lo, hi);
            }
        }
    }

    fn initial_simplex(&self, x0: &[f64]) -> Vec<Vec<f64>> {
        let n = x0.len();
        let mut sim = Vec::with_capacity(n + 1);
        let mut start = x0.to_vec();
        self.project(&mut start);
        sim.push(start.clone());

        for k in 0..n {
            let mut y = start.clone();
            y[k] = if y[k] != 0.0 { y[k] * 1.05 } else { 0.00025 };
            self.project(&mut y);
            // A vertex pinned to the bound steps inward instead
            if y[k] == start[k] {
                let step = if start[k] != 0.0 { start[k].abs() * 0.05 } else { 0.00025 };
                y[k] = start[k] - step;
                self.project(&mut y);
            }
            sim.push(y);
        }
        sim
    }

    /// Minimize `f` starting from `x0`. NaN objective values count as +inf.
    pub fn minimize<F>(&self, mut f: F, x0: &[f64]) -> OptimResult
    where
        F: FnMut(&[f64]) -> f64,
    {
        let n = x0.len();
        let mut evaluations = 0usize;
        let mut eval = |x: &[f64], evaluations: &mut usize| {
            *evaluations += 1;
            let v = f(x);
            if v.is_nan() {
                f64::INFINITY
            } else {
                v
            }
        };

        let mut sim = self.initial_simplex(x0);
        let mut fsim: Vec<f64> = sim.iter().map(|x| eval(x, &mut evaluations)).collect();
        sort_simplex(&mut sim, &mut fsim);

        let mut iterations = 0usize;
        let mut converged = false;

        while evaluations < self.max_fev && iterations < self.max_iter {
            if self.has_converged(&sim, &fsim) {
                converged = true;
                break;
            }

            let mut xbar = vec![0.0; n];
            for vertex in sim.iter().take(n) {
                for (acc, &v) in xbar.iter_mut().zip(vertex.iter()) {
                    *acc += v / n as f64;
                }
            }
            let worst = sim[n].clone();
            let point = |a: f64, b: f64| -> Vec<f64> {
                xbar.iter().zip(worst.iter()).map(|(&m, &w)| a * m + b * w).collect()
            };

            let mut xr = point(1.0 + RHO, -RHO);
            self.project(&mut xr);
            let fxr = eval(&xr, &mut evaluations);
            let mut shrink = false;

            if fxr < fsim[0] {
                let mut xe = point(1.0 + RHO * CHI, -RHO * CHI);
                self.project(&mut xe);
                let fxe = eval(&xe, &mut evaluations);
                if fxe < fxr {
                    sim[n] = xe;
                    fsim[n] = fxe;
                } else {
                    sim[n] = xr;
                    fsim[n] = fxr;
                }
            } else if fxr < fsim[n - 1] {
                sim[n] = xr;
                fsim[n] = fxr;
            } else if fxr < fsim[n] {
                // Outside contraction
                let mut xc = point(1.0 + PSI * RHO, -PSI * RHO);
                self.project(&mut xc);
                let fxc = eval(&xc, &mut evaluations);
                if fxc <= fxr {
                    sim[n] = xc;
                    fsim[n] = fxc;
                } else {
                    shrink = true;
                }
            } else {
                // Inside contraction
                let mut xcc = point(1.0 - PSI, PSI);
                self.project(&mut xcc);
                let fxcc = eval(&xcc, &mut evaluations);
                if fxcc < fsim[n] {
                    sim[n] = xcc;
                    fsim[n] = fxcc;
                } else {
                    shrink = true;
                }
            }

            if shrink {
                let best = sim[0].clone();
                for j in 1..=n {
                    let mut shrunk: Vec<f64> = best
                        .iter()
                        .zip(sim[j].iter())
                        .map(|(&b, &v)| b + SIGMA * (v - b))
                        .collect();
                    self.project(&mut shrunk);
                    fsim[j] = eval(&shrunk, &mut evaluations);
                    sim[j] = shrunk;
                }
            }

            iterations += 1;
            sort_simplex(&mut sim, &mut fsim);
        }

        OptimResult {
            x: sim[0].clone(),
            fun: fsim[0],
            iterations,
            evaluations,
            converged,
        }
    }

    fn has_converged(&self, sim: &[Vec<f64>], fsim: &[f64]) -> bool {
        let x_spread = sim[1..]
            .iter()
            .flat_map(|v| v.iter().zip(sim[0].iter()).map(|(a, b)| (a - b).abs()))
            .fold(0.0f64, f64::max);
        let f_spread = fsim[1..]
            .iter()
            .map(|&v| (v - fsim[0]).abs())
            .fold(0.0f64, |acc, v| if v.is_nan() { f64::INFINITY } else { acc.max(v) });
        x_spread <= self.xatol && f_spread <= self.fatol
    }
}

fn sort_simplex(sim: &mut Vec<Vec<f64>>, fsim: &mut Vec<f64>) {
    let mut order: Vec<usize> = (0..fsim.len()).collect();
    order.sort_by(|&a, &b| fsim[a].total_cmp(&fsim[b]));
    *sim = order.iter().map(|&i| sim[i].clone()).collect();
    *fsim = order.iter().map(|&i| fsim[i]).collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rosenbrock() {
        let rosen = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let result = NelderMead::new().minimize(rosen, &[-1.2, 1.0]);

        assert!(result.converged);
        assert!((result.x[0] - 1.0).abs() < 1e-3);
        assert!((result.x[1] - 1.0).abs() < 1e-3);
        assert!(result.evaluations >= result.iterations);
    }

    #[test]
    fn test_bounds_are_respected() {
        // Unconstrained minimum at (-3, 2); the box pins x to 0
        let f = |x: &[f64]| (x[0] + 3.0).powi(2) + (x[1] - 2.0).powi(2);
        let result = NelderMead::new()
            .with_bounds(vec![(0.0, f64::INFINITY), (0.0, 1.0)])
            .minimize(f, &[1.0, 0.5]);

        assert!(result.x[0] >= 0.0 && result.x[0] < 1e-3);
        assert!((result.x[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_evaluation_ceiling() {
        let mut calls = 0;
        let optimizer = NelderMead {
            max_fev: 50,
            ..NelderMead::default()
        };
        let result = optimizer.minimize(
            |x| {
                calls += 1;
                -x[0].abs()
            },
            &[1.0],
        );
        assert!(!result.converged);
        assert!(calls <= 50 + 2);
        assert_eq!(calls, result.evaluations);
    }

    #[test]
    fn test_nan_counts_as_worst() {
        let f = |x: &[f64]| if x[0] < 0.0 { f64::NAN } else { (x[0] - 2.0).powi(2) };
        let result = NelderMead::new().minimize(f, &[0.5]);
        assert!((result.x[0] - 2.0).abs() < 1e-3);
    }
}
