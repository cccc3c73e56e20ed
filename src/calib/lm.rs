//! Levenberg–Marquardt chi2 minimisation.
//!
//! Parameter errors are taken from the inverse of the curvature matrix
//! `JᵀWJ` at the minimum, i.e. the Δχ² = 1 contour.

use nalgebra::{DMatrix, DVector};

use crate::error::{CalibError, Result};

/// A model `f(x; p)` with an analytic gradient in its parameters.
pub trait Model {
    fn n_params(&self) -> usize;

    fn value(&self, x: f64, params: &[f64]) -> f64;

    /// Write `∂f/∂p_j` at `x` into `grad` (length `n_params`).
    fn gradient(&self, x: f64, params: &[f64], grad: &mut [f64]);
}

#[derive(Debug, Clone, Copy)]
pub struct LmOptions {
    pub max_iterations: usize,
    /// Relative chi2 improvement below which the fit is considered converged.
    pub tolerance: f64,
    pub initial_lambda: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-10,
            initial_lambda: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LmFit {
    pub params: Vec<f64>,
    pub errors: Vec<f64>,
    pub chi2: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// chi2 of `model` with parameters `params` against `(x, y ± sigma)`.
pub fn chi2<M: Model>(model: &M, x: &[f64], y: &[f64], sigma: &[f64], params: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .zip(sigma)
        .map(|((&xi, &yi), &si)| {
            let r = (yi - model.value(xi, params)) / si;
            r * r
        })
        .sum()
}

/// Accumulate `JᵀJ` and `Jᵀr` for weighted residuals `r = (y - f) / sigma`.
fn normal_equations<M: Model>(
    model: &M,
    x: &[f64],
    y: &[f64],
    sigma: &[f64],
    params: &[f64],
) -> (DMatrix<f64>, DVector<f64>) {
    let m = params.len();
    let mut jtj = DMatrix::zeros(m, m);
    let mut jtr = DVector::zeros(m);
    let mut grad = vec![0.0; m];

    for ((&xi, &yi), &si) in x.iter().zip(y).zip(sigma) {
        model.gradient(xi, params, &mut grad);
        let r = (yi - model.value(xi, params)) / si;
        for a in 0..m {
            let ja = grad[a] / si;
            jtr[a] += ja * r;
            for b in 0..=a {
                jtj[(a, b)] += ja * grad[b] / si;
            }
        }
    }
    for a in 0..m {
        for b in 0..a {
            jtj[(b, a)] = jtj[(a, b)];
        }
    }
    (jtj, jtr)
}

/// Minimise chi2 starting from `initial`.
///
/// A fit that runs out of iterations, or whose curvature matrix cannot be
/// inverted, is returned with `converged == false` rather than as an error.
pub fn minimize<M: Model>(
    model: &M,
    x: &[f64],
    y: &[f64],
    sigma: &[f64],
    initial: &[f64],
    options: &LmOptions,
) -> Result<LmFit> {
    let m = model.n_params();
    if initial.len() != m {
        return Err(CalibError::InvalidArgument(format!(
            "expected {m} initial values, got {}",
            initial.len()
        )));
    }
    if x.len() != y.len() || x.len() != sigma.len() {
        return Err(CalibError::InvalidArgument(
            "x, y and sigma must have the same length".to_string(),
        ));
    }
    if x.len() < m {
        return Err(CalibError::TooFewPoints {
            needed: m,
            got: x.len(),
        });
    }
    if sigma.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
        return Err(CalibError::InvalidArgument(
            "uncertainties must be finite and positive".to_string(),
        ));
    }

    let mut params = DVector::from_column_slice(initial);
    let mut current = chi2(model, x, y, sigma, params.as_slice());
    if !current.is_finite() {
        return Err(CalibError::InvalidArgument(
            "chi2 is not finite at the initial values".to_string(),
        ));
    }

    let mut lambda = options.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        iterations += 1;
        let (jtj, jtr) = normal_equations(model, x, y, sigma, params.as_slice());

        let mut accepted = false;
        while lambda < 1e12 {
            let mut damped = jtj.clone();
            for i in 0..m {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
            }
            let Some(chol) = damped.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let delta = chol.solve(&jtr);
            let trial = &params + &delta;
            let trial_chi2 = chi2(model, x, y, sigma, trial.as_slice());

            if trial_chi2.is_finite() && trial_chi2 <= current {
                let improvement = current - trial_chi2;
                let step_small = delta.norm() <= options.tolerance * (trial.norm() + options.tolerance);
                params = trial;
                current = trial_chi2;
                lambda = (lambda / 10.0).max(1e-12);
                accepted = true;
                if improvement <= options.tolerance * current.max(f64::MIN_POSITIVE) || step_small {
                    converged = true;
                }
                break;
            }
            lambda *= 10.0;
        }

        // No downhill step at any damping: already at the minimum.
        if !accepted {
            converged = true;
        }
        if converged {
            break;
        }
    }

    let (jtj, _) = normal_equations(model, x, y, sigma, params.as_slice());
    let errors = match jtj.try_inverse() {
        Some(cov) => (0..m).map(|i| cov[(i, i)].sqrt()).collect(),
        None => vec![f64::NAN; m],
    };
    let errors_valid = errors.iter().all(|e: &f64| e.is_finite());

    Ok(LmFit {
        params: params.as_slice().to_vec(),
        errors,
        chi2: current,
        iterations,
        converged: converged && errors_valid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exponential;

    impl Model for Exponential {
        fn n_params(&self) -> usize {
            2
        }

        fn value(&self, x: f64, p: &[f64]) -> f64 {
            p[0] * (p[1] * x).exp()
        }

        fn gradient(&self, x: f64, p: &[f64], grad: &mut [f64]) {
            let e = (p[1] * x).exp();
            grad[0] = e;
            grad[1] = p[0] * x * e;
        }
    }

    #[test]
    fn test_recovers_exponential() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2.5 * (-1.3 * xi).exp()).collect();
        let sigma = vec![0.01; x.len()];

        let fit = minimize(&Exponential, &x, &y, &sigma, &[1.0, -0.5], &LmOptions::default()).unwrap();
        assert!(fit.converged);
        assert!((fit.params[0] - 2.5).abs() < 1e-6);
        assert!((fit.params[1] + 1.3).abs() < 1e-6);
        assert!(fit.chi2 < 1e-8);
        assert!(fit.errors.iter().all(|e| e.is_finite() && *e > 0.0));
    }

    #[test]
    fn test_errors_scale_with_sigma() {
        let x: Vec<f64> = (0..20).map(|i| i as f64 * 0.1).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2.5 * (-1.3 * xi).exp()).collect();
        let opts = LmOptions::default();

        let a = minimize(&Exponential, &x, &y, &vec![0.01; 20], &[2.0, -1.0], &opts).unwrap();
        let b = minimize(&Exponential, &x, &y, &vec![0.02; 20], &[2.0, -1.0], &opts).unwrap();
        assert!((b.errors[0] / a.errors[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_rejects_bad_input() {
        let opts = LmOptions::default();
        assert!(minimize(&Exponential, &[0.0], &[1.0], &[1.0], &[1.0, 1.0], &opts).is_err());
        assert!(minimize(&Exponential, &[0.0, 1.0], &[1.0, 2.0], &[1.0, 0.0], &[1.0, 1.0], &opts).is_err());
        assert!(minimize(&Exponential, &[0.0, 1.0], &[1.0, 2.0], &[1.0, 1.0], &[1.0], &opts).is_err());
    }
}
