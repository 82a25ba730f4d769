//! Fréchet distance between activation populations.
//!
//! Both populations are summarized as multivariate Gaussians; the distance
//! is `‖Δμ‖² + tr(Σ₁ + Σ₂ − 2√(Σ₁Σ₂))`. The trace of the matrix square
//! root is computed through the symmetric form `√Σ₁ Σ₂ √Σ₁`, so only
//! symmetric eigendecompositions (power iteration with deflation) are
//! needed.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use tracing::info;

use crate::error::{Error, Result};
use crate::eval::features::FeatureExtractor;
use crate::eval::sampling::sample_generator;
use crate::eval::stats::{population_stats, PopulationStats};
use crate::eval::EvalConfig;
use crate::model::Generator;

/// Power iteration for the dominant eigenpair of a symmetric matrix.
fn power_iteration(matrix: &Array2<f64>, max_iter: usize, tol: f64) -> (f64, Array1<f64>) {
    let n = matrix.nrows();
    let mut v = Array1::from_elem(n, 1.0 / (n as f64).sqrt());
    let mut eigenvalue = 0.0;

    for _ in 0..max_iter {
        let new_v = matrix.dot(&v);
        let norm = new_v.dot(&new_v).sqrt();
        if norm < tol {
            // Remaining spectrum is numerically zero.
            return (0.0, v);
        }
        let new_v = new_v / norm;
        let new_eigenvalue = new_v.dot(&matrix.dot(&new_v));
        let converged = (new_eigenvalue - eigenvalue).abs() < tol;
        v = new_v;
        eigenvalue = new_eigenvalue;
        if converged {
            break;
        }
    }
    (eigenvalue, v)
}

/// Eigendecomposition of a symmetric matrix by power iteration and
/// deflation. Eigenvalues come out in decreasing magnitude order with
/// orthonormal eigenvectors in the columns.
pub fn symmetric_eigen(matrix: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = matrix.nrows();
    let mut eigenvalues = Array1::zeros(n);
    let mut eigenvectors = Array2::zeros((n, n));
    let mut deflated = matrix.clone();

    for i in 0..n {
        let (lambda, v) = power_iteration(&deflated, 500, 1e-13);
        eigenvalues[i] = lambda;
        for j in 0..n {
            eigenvectors[[j, i]] = v[j];
        }
        // Deflate: A -= λ v vᵀ
        for r in 0..n {
            for c in 0..n {
                deflated[[r, c]] -= lambda * v[r] * v[c];
            }
        }
    }
    (eigenvalues, eigenvectors)
}

/// Square root of a symmetric positive-semidefinite matrix. Negative
/// eigenvalues (numerical noise) are clamped to zero.
pub fn sqrtm_symmetric(matrix: &Array2<f64>) -> Array2<f64> {
    let (eigenvalues, eigenvectors) = symmetric_eigen(matrix);
    let n = matrix.nrows();
    let mut out = Array2::zeros((n, n));
    for k in 0..n {
        let s = eigenvalues[k].max(0.0).sqrt();
        if s == 0.0 {
            continue;
        }
        for r in 0..n {
            for c in 0..n {
                out[[r, c]] += s * eigenvectors[[r, k]] * eigenvectors[[c, k]];
            }
        }
    }
    out
}

/// `tr √(Σ₁Σ₂)` via the eigenvalues of the symmetric product
/// `√Σ₁ Σ₂ √Σ₁`.
fn trace_sqrt_product(sigma1: &Array2<f64>, sigma2: &Array2<f64>) -> f64 {
    let root1 = sqrtm_symmetric(sigma1);
    let inner = root1.dot(sigma2).dot(&root1);
    let (eigenvalues, _) = symmetric_eigen(&inner);
    eigenvalues.iter().map(|&l| l.max(0.0).sqrt()).sum()
}

/// Closed-form Gaussian distance between two (mean, covariance) summaries.
/// Zero exactly when both mean and covariance agree; lower is better.
pub fn frechet_distance(
    mu1: &Array1<f64>,
    sigma1: &Array2<f64>,
    mu2: &Array1<f64>,
    sigma2: &Array2<f64>,
) -> Result<f64> {
    let d = mu1.len();
    if mu2.len() != d
        || sigma1.dim() != (d, d)
        || sigma2.dim() != (d, d)
    {
        return Err(Error::Shape {
            expected: format!("mu ({d}), sigma ({d}, {d})"),
            actual: format!(
                "mu {}, sigma {:?} / {:?}",
                mu2.len(),
                sigma1.dim(),
                sigma2.dim()
            ),
        });
    }

    let diff = mu1 - mu2;
    let mean_term = diff.dot(&diff);
    let trace1: f64 = (0..d).map(|i| sigma1[[i, i]]).sum();
    let trace2: f64 = (0..d).map(|i| sigma2[[i, i]]).sum();
    Ok(mean_term + trace1 + trace2 - 2.0 * trace_sqrt_product(sigma1, sigma2))
}

/// Fréchet distance between a fresh generated population and the cached real
/// population.
pub fn fid(
    extractor: &dyn FeatureExtractor,
    generator: &mut Generator,
    eval_cfg: &EvalConfig,
    real: &PopulationStats,
    rng: &mut StdRng,
) -> Result<f64> {
    info!(eval_size = eval_cfg.eval_size, "evaluating Fréchet distance");
    let generated = sample_generator(generator, eval_cfg.eval_size, eval_cfg.batch_size, rng)?;
    let gen_stats = population_stats(
        extractor,
        &generated,
        eval_cfg.batch_size,
        eval_cfg.gpu_batch,
    )?;
    let value = frechet_distance(&gen_stats.mu, &gen_stats.sigma, &real.mu, &real.sigma)?;
    info!(fid = value, "Fréchet distance");
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn eigen_recovers_diagonal() {
        let m = array![[3.0, 0.0], [0.0, 1.0]];
        let (vals, _) = symmetric_eigen(&m);
        assert!((vals[0] - 3.0).abs() < 1e-8);
        assert!((vals[1] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn sqrtm_squares_back() {
        let m = array![[4.0, 1.0], [1.0, 3.0]];
        let root = sqrtm_symmetric(&m);
        let back = root.dot(&root);
        for (a, b) in m.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn distance_to_self_is_zero() {
        let mu = array![0.5, -1.0, 2.0];
        let sigma = array![[2.0, 0.3, 0.0], [0.3, 1.5, 0.1], [0.0, 0.1, 1.0]];
        let d = frechet_distance(&mu, &sigma, &mu, &sigma).unwrap();
        assert!(d.abs() < 1e-6, "d = {d}");
    }

    #[test]
    fn mean_shift_contributes_squared_norm() {
        let mu1 = array![0.0, 0.0];
        let mu2 = array![3.0, 4.0];
        let sigma = Array2::eye(2);
        let d = frechet_distance(&mu1, &sigma, &mu2, &sigma).unwrap();
        assert!((d - 25.0).abs() < 1e-6, "d = {d}");
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mu1 = array![0.0, 0.0];
        let mu2 = array![0.0, 0.0, 0.0];
        let s2 = Array2::eye(2);
        let s3 = Array2::eye(3);
        assert!(frechet_distance(&mu1, &s2, &mu2, &s3).is_err());
    }
}
