//! Evaluation pipeline: distributional metrics comparing generated jets
//! against real data.
//!
//! The pipeline has three stages: a fixed feature extractor turning point
//! clouds into activation vectors ([`features`]), population statistics with
//! a persistent cache ([`stats`]), and the metrics themselves — Fréchet
//! distance on activations ([`frechet`]), Jensen-Shannon divergence on
//! per-channel histograms ([`jsd`]) and earth-mover distance on raw and
//! derived observables ([`wasserstein`]).

pub mod features;
pub mod frechet;
pub mod jsd;
pub mod sampling;
pub mod stats;
pub mod wasserstein;

pub use features::{FeatureExtractor, ProjectionExtractor};
pub use frechet::{fid, frechet_distance};
pub use jsd::evaluate_jsd;
pub use sampling::{sample_generator, sample_latent, subsample};
pub use stats::{population_stats, PopulationStats, StatsCache};
pub use wasserstein::{evaluate_w1, wasserstein_1d, LorentzVector};

use std::collections::HashMap;

/// Externally owned metric history: metric name (with sample-size suffix
/// where applicable) to the sequence of per-channel values recorded over
/// evaluation runs.
pub type MetricHistory = HashMap<String, Vec<Vec<f64>>>;

/// Evaluation-pipeline sizes.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Samples per generation round
    pub batch_size: usize,
    /// Generated population size for the Fréchet metric
    pub eval_size: usize,
    /// Samples per side for the Jensen-Shannon cycle
    pub num_samples: usize,
    /// Embedding batches accumulated per chunk before moving the chunk into
    /// the host-side activation matrix
    pub gpu_batch: usize,
    /// Sample sizes for the earth-mover cycle
    pub w1_num_samples: Vec<usize>,
    /// Also compare derived jet observables (invariant mass, pT)
    pub jet_features: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            eval_size: 2048,
            num_samples: 1024,
            gpu_batch: 25,
            w1_num_samples: vec![100, 1000, 10_000],
            jet_features: true,
        }
    }
}

/// Column-wise mean and population standard deviation over repeat rows.
pub(crate) fn column_mean_std(rows: &[Vec<f64>]) -> (Vec<f64>, Vec<f64>) {
    let n = rows.len();
    let cols = rows.first().map(Vec::len).unwrap_or(0);
    let mut mean = vec![0.0; cols];
    for row in rows {
        for (m, &x) in mean.iter_mut().zip(row) {
            *m += x / n as f64;
        }
    }
    let mut std = vec![0.0; cols];
    for row in rows {
        for ((s, &m), &x) in std.iter_mut().zip(&mean).zip(row) {
            *s += (x - m) * (x - m) / n as f64;
        }
    }
    for s in &mut std {
        *s = s.sqrt();
    }
    (mean, std)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_mean_std_over_repeats() {
        let rows = vec![vec![1.0, 10.0], vec![3.0, 10.0]];
        let (mean, std) = column_mean_std(&rows);
        assert_eq!(mean, vec![2.0, 10.0]);
        assert_eq!(std, vec![1.0, 0.0]);
    }
}
