//! Gaussian process regression with a Matern 5/2 kernel.
//!
//! Inputs are points of the unit hypercube, targets are standardized before
//! fitting. Dimensions stay small (two or three parameters, tens of
//! observations) so a dense Cholesky factorization is enough.

use crate::error::OptimizerError;

const JITTERS: [f64; 4] = [0.0, 1e-8, 1e-6, 1e-4];
const MIN_VARIANCE: f64 = 1e-12;

/// Matern 5/2 covariance with unit signal variance.
fn matern52(a: &[f64], b: &[f64], length_scale: f64) -> f64 {
    let r = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
        / length_scale;
    let s = 5f64.sqrt() * r;
    (1.0 + s + s * s / 3.0) * (-s).exp()
}

/// Lower-triangular Cholesky factor of a symmetric positive definite matrix.
fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = matrix.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let d = matrix[i][i] - sum;
                if d <= 0.0 || !d.is_finite() {
                    return None;
                }
                l[i][j] = d.sqrt();
            } else {
                l[i][j] = (matrix[i][j] - sum) / l[j][j];
            }
        }
    }
    Some(l)
}

/// Solve `L x = b` for lower-triangular `L`.
fn forward_substitute(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in 0..n {
        let sum: f64 = (0..i).map(|k| l[i][k] * x[k]).sum();
        x[i] = (b[i] - sum) / l[i][i];
    }
    x
}

/// Solve `L^T x = b` for lower-triangular `L`.
fn backward_substitute(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|k| l[k][i] * x[k]).sum();
        x[i] = (b[i] - sum) / l[i][i];
    }
    x
}

/// Posterior prediction at one point, in standardized units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub mean: f64,
    pub std: f64,
}

/// A fitted Gaussian process.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    inputs: Vec<Vec<f64>>,
    chol: Vec<Vec<f64>>,
    alpha: Vec<f64>,
    length_scale: f64,
    y_mean: f64,
    y_std: f64,
    log_marginal_likelihood: f64,
}

impl GaussianProcess {
    /// Fit with a fixed length scale, retrying with growing jitter when the
    /// covariance matrix is not numerically positive definite.
    pub fn fit(
        inputs: &[Vec<f64>],
        targets: &[f64],
        length_scale: f64,
        noise: f64,
    ) -> Result<Self, OptimizerError> {
        if inputs.is_empty() || inputs.len() != targets.len() {
            return Err(OptimizerError::FitFailed(format!(
                "need matching non-empty inputs and targets, got {} and {}",
                inputs.len(),
                targets.len()
            )));
        }

        let n = targets.len() as f64;
        let y_mean = targets.iter().sum::<f64>() / n;
        let variance = targets.iter().map(|y| (y - y_mean).powi(2)).sum::<f64>() / n;
        let y_std = if variance.sqrt() > 1e-12 {
            variance.sqrt()
        } else {
            1.0
        };
        let y: Vec<f64> = targets.iter().map(|t| (t - y_mean) / y_std).collect();

        let base: Vec<Vec<f64>> = inputs
            .iter()
            .map(|a| inputs.iter().map(|b| matern52(a, b, length_scale)).collect())
            .collect();

        for jitter in JITTERS {
            let mut k = base.clone();
            for (i, row) in k.iter_mut().enumerate() {
                row[i] += noise + jitter;
            }
            let Some(chol) = cholesky(&k) else {
                tracing::warn!(length_scale, jitter, "covariance not positive definite, retrying");
                continue;
            };

            let alpha = backward_substitute(&chol, &forward_substitute(&chol, &y));
            let data_fit: f64 = y.iter().zip(&alpha).map(|(a, b)| a * b).sum();
            let log_det: f64 = (0..chol.len()).map(|i| chol[i][i].ln()).sum();
            let log_marginal_likelihood =
                -0.5 * data_fit - log_det - 0.5 * n * (2.0 * std::f64::consts::PI).ln();

            return Ok(Self {
                inputs: inputs.to_vec(),
                chol,
                alpha,
                length_scale,
                y_mean,
                y_std,
                log_marginal_likelihood,
            });
        }

        Err(OptimizerError::FitFailed(format!(
            "Cholesky factorization failed for length scale {length_scale} after {} jitter levels",
            JITTERS.len()
        )))
    }

    /// Fit once per candidate length scale and keep the model with the
    /// highest log marginal likelihood.
    pub fn fit_best(
        inputs: &[Vec<f64>],
        targets: &[f64],
        length_scales: &[f64],
        noise: f64,
    ) -> Result<Self, OptimizerError> {
        let mut best: Option<Self> = None;
        let mut last_error = None;

        for &length_scale in length_scales {
            match Self::fit(inputs, targets, length_scale, noise) {
                Ok(model) => {
                    tracing::debug!(
                        length_scale,
                        lml = model.log_marginal_likelihood,
                        "fitted surrogate"
                    );
                    let better = best.as_ref().map_or(true, |b| {
                        model.log_marginal_likelihood > b.log_marginal_likelihood
                    });
                    if better {
                        best = Some(model);
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }

        best.ok_or_else(|| {
            last_error.unwrap_or_else(|| {
                OptimizerError::FitFailed("no length scales configured".to_string())
            })
        })
    }

    /// Posterior at `x`, in standardized units.
    pub fn predict_standardized(&self, x: &[f64]) -> Prediction {
        let k_star: Vec<f64> = self
            .inputs
            .iter()
            .map(|xi| matern52(xi, x, self.length_scale))
            .collect();
        let mean = k_star.iter().zip(&self.alpha).map(|(a, b)| a * b).sum();
        let v = forward_substitute(&self.chol, &k_star);
        let variance = (1.0 - v.iter().map(|vi| vi * vi).sum::<f64>()).max(MIN_VARIANCE);
        Prediction {
            mean,
            std: variance.sqrt(),
        }
    }

    /// Posterior at `x`, in the units of the fitted targets.
    pub fn predict(&self, x: &[f64]) -> Prediction {
        let p = self.predict_standardized(x);
        Prediction {
            mean: p.mean * self.y_std + self.y_mean,
            std: p.std * self.y_std,
        }
    }

    /// Convert a target value into standardized units.
    pub fn standardize(&self, y: f64) -> f64 {
        (y - self.y_mean) / self.y_std
    }

    pub fn length_scale(&self) -> f64 {
        self.length_scale
    }

    pub fn log_marginal_likelihood(&self) -> f64 {
        self.log_marginal_likelihood
    }
}
