//! Exponential decay models for morphogen concentration profiles and a small
//! Levenberg-Marquardt least-squares fitter for them.

use anyhow::Result;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e16;
const RELATIVE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecayModel {
    /// `C(x) = c0 * exp(-k x)`
    Exponential,
    /// `C(x) = c0 * exp(-k x) + b`
    ExponentialOffset,
}

impl DecayModel {
    pub fn n_params(self) -> usize {
        match self {
            DecayModel::Exponential => 2,
            DecayModel::ExponentialOffset => 3,
        }
    }

    pub fn evaluate(self, p: &[f64], x: f64) -> f64 {
        let decay = p[0] * (-p[1] * x).exp();
        match self {
            DecayModel::Exponential => decay,
            DecayModel::ExponentialOffset => decay + p[2],
        }
    }

    // Partial derivatives with respect to (c0, k, b).
    fn gradient(self, p: &[f64], x: f64) -> [f64; 3] {
        let e = (-p[1] * x).exp();
        [e, -p[0] * x * e, 1.0]
    }
}

/// Fitted parameters of a decay model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub model: DecayModel,
    pub c0: f64,
    pub k: f64,
    /// Constant offset; always 0 for the pure exponential.
    pub b: f64,
    /// Decay length, `1 / k`.
    pub lambda: f64,
    pub residual_sum_squares: f64,
    pub evaluations: usize,
    pub converged: bool,
}

impl FitResult {
    fn params(&self) -> Vec<f64> {
        vec![self.c0, self.k, self.b]
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.model.evaluate(&self.params(), x)
    }

    pub fn label(&self) -> String {
        match self.model {
            DecayModel::Exponential => format!("C(x) = {:.4} * exp(-x / {:.4})", self.c0, self.lambda),
            DecayModel::ExponentialOffset => {
                format!("C(x) = {:.4} * exp(-x / {:.4}) + {:.4}", self.c0, self.lambda, self.b)
            }
        }
    }
}

fn residual_sum_squares(model: DecayModel, p: &[f64], xs: &[f64], ys: &[f64]) -> f64 {
    xs.iter().zip(ys).map(|(&x, &y)| (y - model.evaluate(p, x)).powi(2)).sum()
}

/// Least-squares fit of `model` to the points `(xs[i], ys[i])`, starting from `p0`
/// (`c0, k[, b]`). Gives up after `max_evaluations` model evaluations over the data.
pub fn fit(model: DecayModel, xs: &[f64], ys: &[f64], p0: &[f64], max_evaluations: usize) -> Result<FitResult> {
    let n = model.n_params();
    if xs.len() != ys.len() {
        anyhow::bail!("x and y have different lengths ({} vs {})", xs.len(), ys.len());
    }
    if xs.len() < n {
        anyhow::bail!("need at least {} points to fit {:?}, got {}", n, model, xs.len());
    }
    if p0.len() < n {
        anyhow::bail!("initial guess needs {} parameters, got {}", n, p0.len());
    }
    if xs.iter().chain(ys).any(|v| !v.is_finite()) {
        anyhow::bail!("profile contains non-finite values");
    }

    let mut p: Vec<f64> = p0[..n].to_vec();
    let mut rss = residual_sum_squares(model, &p, xs, ys);
    let mut evaluations = 1;
    let mut damping = INITIAL_DAMPING;
    let mut converged = false;

    while evaluations < max_evaluations {
        let mut jtj = DMatrix::<f64>::zeros(n, n);
        let mut jtr = DVector::<f64>::zeros(n);
        for (&x, &y) in xs.iter().zip(ys) {
            let g = model.gradient(&p, x);
            let r = y - model.evaluate(&p, x);
            for i in 0..n {
                jtr[i] += g[i] * r;
                for j in 0..n {
                    jtj[(i, j)] += g[i] * g[j];
                }
            }
        }

        // Inner loop: raise the damping until a step lowers the residual.
        let mut improved = false;
        while evaluations < max_evaluations && damping < MAX_DAMPING {
            let mut a = jtj.clone();
            for i in 0..n {
                a[(i, i)] += damping * jtj[(i, i)].max(1e-12);
            }
            let Some(delta) = a.lu().solve(&jtr) else {
                damping *= 10.0;
                continue;
            };
            let candidate: Vec<f64> = p.iter().zip(delta.iter()).map(|(a, d)| a + d).collect();
            let candidate_rss = residual_sum_squares(model, &candidate, xs, ys);
            evaluations += 1;

            if candidate_rss.is_finite() && candidate_rss < rss {
                let gain = rss - candidate_rss;
                p = candidate;
                rss = candidate_rss;
                damping = (damping / 10.0).max(1e-12);
                improved = true;
                if gain <= RELATIVE_TOLERANCE * rss.max(f64::MIN_POSITIVE) {
                    converged = true;
                }
                break;
            }
            damping *= 10.0;
        }

        if !improved {
            // No step reduces the residual any more: a (local) minimum.
            converged = damping >= MAX_DAMPING;
            break;
        }
        if converged {
            break;
        }
    }

    if !converged {
        warn!("decay fit stopped after {} evaluations without converging", evaluations);
    }
    debug!("decay fit: params {:?}, rss {:e}, {} evaluations", p, rss, evaluations);

    let b = if n == 3 { p[2] } else { 0.0 };
    Ok(FitResult {
        model,
        c0: p[0],
        k: p[1],
        b,
        lambda: 1.0 / p[1],
        residual_sum_squares: rss,
        evaluations,
        converged,
    })
}

/// Source of width `lf` producing at rate `p`, degradation `d`, in a tissue of length `lt`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyticParams {
    pub p: f64,
    pub d: f64,
    pub lf: f64,
    pub lt: f64,
}

fn check_domain(x: f64, params: &AnalyticParams) -> Result<()> {
    if !(0.0..=params.lt).contains(&x) {
        anyhow::bail!("x = {} outside the tissue [0, {}]", x, params.lt);
    }
    Ok(())
}

/// Steady-state readout for a semi-infinite tissue; `k` is the inverse decay length.
pub fn analytic_readout_infinite(x: f64, params: &AnalyticParams, k: f64) -> Result<f64> {
    check_domain(x, params)?;
    let AnalyticParams { p, d, lf, .. } = *params;
    Ok(if x <= lf {
        p / d * (1.0 - (-lf * k).exp() * (x * k).cosh())
    } else {
        p / d * (lf * k).sinh() * (-x * k).exp()
    })
}

/// Steady-state readout for a tissue of finite length `lt` with no-flux ends.
pub fn analytic_readout_finite(x: f64, params: &AnalyticParams, k: f64) -> Result<f64> {
    check_domain(x, params)?;
    let AnalyticParams { p, d, lf, lt } = *params;
    Ok(if x <= lf {
        p / d * (1.0 + ((lf - lt) * k).sinh() / (lt * k).sinh() * (x * k).cosh())
    } else {
        p / d * (lf * k).sinh() / (lt * k).sinh() * ((lt - x) * k).cosh()
    })
}

/// `n` evenly spaced samples from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic(model: DecayModel, p: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let xs = linspace(1.0, 200.0, 200);
        let ys = xs.iter().map(|&x| model.evaluate(p, x)).collect();
        (xs, ys)
    }

    #[test]
    fn test_recovers_offset_model() {
        let (xs, ys) = synthetic(DecayModel::ExponentialOffset, &[5.0, 0.05, 0.3]);
        let result = fit(DecayModel::ExponentialOffset, &xs, &ys, &[1.0, 0.02, 0.0], 5000).unwrap();
        assert!(result.converged);
        assert!((result.c0 - 5.0).abs() < 1e-6, "c0 = {}", result.c0);
        assert!((result.k - 0.05).abs() < 1e-8, "k = {}", result.k);
        assert!((result.b - 0.3).abs() < 1e-6, "b = {}", result.b);
        assert!((result.lambda - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_recovers_pure_exponential() {
        let (xs, ys) = synthetic(DecayModel::Exponential, &[1000.0, 0.02]);
        let result = fit(DecayModel::Exponential, &xs, &ys, &[500.0, 0.05], 5000).unwrap();
        assert!((result.c0 - 1000.0).abs() < 1e-4);
        assert!((result.k - 0.02).abs() < 1e-9);
        assert_eq!(result.b, 0.0);
        assert!(result.label().starts_with("C(x) = 1000.0000 * exp(-x / 50.0000)"));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(fit(DecayModel::ExponentialOffset, &[1.0, 2.0], &[1.0, 2.0], &[1.0, 1.0, 1.0], 100).is_err());
        assert!(fit(DecayModel::Exponential, &[1.0, 2.0, 3.0], &[1.0, f64::NAN, 2.0], &[1.0, 1.0], 100).is_err());
        assert!(fit(DecayModel::Exponential, &[1.0, 2.0], &[1.0], &[1.0, 1.0], 100).is_err());
    }

    #[test]
    fn test_evaluation_budget_is_respected() {
        let (xs, ys) = synthetic(DecayModel::ExponentialOffset, &[5.0, 0.05, 0.3]);
        let result = fit(DecayModel::ExponentialOffset, &xs, &ys, &[1.0, 0.02, 0.0], 3).unwrap();
        assert!(result.evaluations <= 3);
    }

    #[test]
    fn test_analytic_readouts() {
        let params = AnalyticParams { p: 2.0, d: 1.0, lf: 10.0, lt: 100.0 };
        let k = 0.1;
        // Both branches of the infinite solution meet at the source edge.
        let inner = 2.0 * (1.0 - (-1.0f64).exp() * 1.0f64.cosh());
        let outer = 2.0 * 1.0f64.sinh() * (-1.0f64).exp();
        assert!((inner - outer).abs() < 1e-12);
        assert!((analytic_readout_infinite(10.0, &params, k).unwrap() - inner).abs() < 1e-12);
        // Far from the source the finite solution flattens out (zero flux at lt).
        let near_end = analytic_readout_finite(99.9, &params, k).unwrap();
        let at_end = analytic_readout_finite(100.0, &params, k).unwrap();
        assert!((near_end - at_end).abs() < 1e-3 * at_end);
        assert!(analytic_readout_infinite(-1.0, &params, k).is_err());
        assert!(analytic_readout_finite(101.0, &params, k).is_err());
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 1000.0, 5), vec![0.0, 250.0, 500.0, 750.0, 1000.0]);
        assert_eq!(linspace(3.0, 4.0, 1), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }
}
