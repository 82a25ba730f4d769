//! Feature-extractor adapter.
//!
//! The distributional metrics only need a fixed map from point clouds to
//! activation vectors. The real extractor is a pretrained graph-convolutional
//! classifier whose penultimate-layer activations are used as the feature
//! map; it lives behind [`FeatureExtractor`] as an external collaborator.
//! [`ProjectionExtractor`] is the in-crate stand-in: a fixed seeded linear
//! projection, deterministic and never trained.

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

/// A fixed map from a batch of point clouds to per-sample activation
/// vectors.
pub trait FeatureExtractor {
    /// Width of the activation vectors.
    fn dim(&self) -> usize;

    /// `(n, num_hits, node_feat_size) -> (n, dim)`
    fn embed(&self, batch: &Array3<f64>) -> Result<Array2<f64>>;
}

/// Deterministic random-projection feature map.
///
/// Flattens each cloud and applies a fixed Gaussian projection drawn from a
/// seeded RNG, so two extractors built with the same shape and seed are
/// identical.
#[derive(Debug, Clone)]
pub struct ProjectionExtractor {
    num_hits: usize,
    node_feat_size: usize,
    weights: Array2<f64>,
}

impl ProjectionExtractor {
    pub fn new(num_hits: usize, node_feat_size: usize, dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let in_dim = num_hits * node_feat_size;
        let scale = 1.0 / (in_dim as f64).sqrt();
        let weights = Array2::from_shape_fn((in_dim, dim), |_| {
            rng.gen_range(-1.0..1.0f64) * scale
        });
        Self {
            num_hits,
            node_feat_size,
            weights,
        }
    }

    /// Build from an explicit weight matrix (rows = flattened input
    /// channels), e.g. one restored from a checkpoint.
    pub fn from_weights(num_hits: usize, node_feat_size: usize, weights: Array2<f64>) -> Result<Self> {
        if weights.nrows() != num_hits * node_feat_size {
            return Err(Error::Shape {
                expected: format!("({}, _)", num_hits * node_feat_size),
                actual: format!("{:?}", weights.dim()),
            });
        }
        Ok(Self {
            num_hits,
            node_feat_size,
            weights,
        })
    }
}

impl FeatureExtractor for ProjectionExtractor {
    fn dim(&self) -> usize {
        self.weights.ncols()
    }

    fn embed(&self, batch: &Array3<f64>) -> Result<Array2<f64>> {
        let (n, hits, feat) = batch.dim();
        if hits != self.num_hits || feat != self.node_feat_size {
            return Err(Error::Shape {
                expected: format!("(_, {}, {})", self.num_hits, self.node_feat_size),
                actual: format!("({n}, {hits}, {feat})"),
            });
        }
        let in_dim = hits * feat;
        let flat = Array2::from_shape_fn((n, in_dim), |(s, k)| batch[[s, k / feat, k % feat]]);
        Ok(flat.dot(&self.weights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_shape() {
        let ex = ProjectionExtractor::new(10, 3, 16, 0);
        let batch = Array3::<f64>::ones((4, 10, 3));
        let acts = ex.embed(&batch).unwrap();
        assert_eq!(acts.dim(), (4, 16));
    }

    #[test]
    fn same_seed_same_embedding() {
        let a = ProjectionExtractor::new(10, 3, 16, 9);
        let b = ProjectionExtractor::new(10, 3, 16, 9);
        let batch = Array3::from_shape_fn((2, 10, 3), |(s, i, c)| (s + i + c) as f64);
        assert_eq!(a.embed(&batch).unwrap(), b.embed(&batch).unwrap());
    }

    #[test]
    fn wrong_cloud_shape_is_rejected() {
        let ex = ProjectionExtractor::new(10, 3, 16, 0);
        let batch = Array3::<f64>::ones((4, 10, 4));
        assert!(ex.embed(&batch).is_err());
    }

    #[test]
    fn restored_weights_reproduce_the_projection() {
        // 2 points of 3 channels flatten to 6 inputs.
        let weights = Array2::from_shape_fn((6, 2), |(r, c)| (r + 2 * c) as f64 * 0.1);
        let ex = ProjectionExtractor::from_weights(2, 3, weights.clone()).unwrap();
        assert_eq!(ex.dim(), 2);

        let batch = Array3::from_shape_fn((1, 2, 3), |(_, i, c)| (i * 3 + c) as f64);
        let acts = ex.embed(&batch).unwrap();
        for out in 0..2 {
            let expected: f64 = (0..6).map(|k| k as f64 * weights[[k, out]]).sum();
            assert!((acts[[0, out]] - expected).abs() < 1e-12);
        }

        // Row count must match the flattened cloud width.
        assert!(ProjectionExtractor::from_weights(3, 3, weights).is_err());
    }
}
