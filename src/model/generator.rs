//! Generator: latent point cloud in, synthesized jet out.

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{resolve, GanConfig, ResolvedConfig, Role};
use crate::error::{Error, Result};
use crate::model::{build_blocks, copy_blocks, run_blocks, MessagePassingBlock};

/// Generator network.
///
/// Consumes a `(batch, num_hits, first_node_size)` latent cloud and produces
/// a `(batch, num_hits, node_feat_size)` point cloud, optionally bounded by
/// tanh.
#[derive(Debug)]
pub struct Generator {
    cfg: ResolvedConfig,
    blocks: Vec<MessagePassingBlock>,
    rng: StdRng,
}

impl Generator {
    /// Resolve the base configuration for the generator role and build the
    /// network with a seeded RNG.
    pub fn new(base: &GanConfig, seed: u64) -> Result<Self> {
        Self::from_resolved(resolve(base, Role::Generator)?, seed)
    }

    /// Build from an already resolved configuration.
    pub fn from_resolved(cfg: ResolvedConfig, seed: u64) -> Result<Self> {
        if cfg.role != Role::Generator {
            return Err(Error::Config(
                "resolved configuration is not for the generator role".into(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut blocks = build_blocks(&cfg, &mut rng);
        if let Some(gain) = cfg.glorot {
            for block in &mut blocks {
                block.glorot_uniform(gain, &mut rng);
            }
        }
        Ok(Self { cfg, blocks, rng })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.cfg
    }

    /// Forward pass. `noise` is `(batch, num_hits, first_node_size)`;
    /// `labels`, when the configuration injects them, is
    /// `(batch, label_dim)`.
    pub fn forward(
        &mut self,
        noise: &Array3<f64>,
        labels: Option<&Array2<f64>>,
        training: bool,
    ) -> Result<Array3<f64>> {
        let (batch, hits, width) = noise.dim();
        if hits != self.cfg.num_hits || width != self.cfg.first_node_size {
            return Err(Error::Shape {
                expected: format!("(_, {}, {})", self.cfg.num_hits, self.cfg.first_node_size),
                actual: format!("({batch}, {hits}, {width})"),
            });
        }

        let hidden = run_blocks(
            &self.cfg,
            &mut self.blocks,
            noise,
            labels,
            training,
            &mut self.rng,
        )?;

        // Truncate the hidden state to the target feature width; bound with
        // tanh when configured.
        let feat = self.cfg.node_feat_size;
        let mut out = Array3::from_shape_fn((batch, hits, feat), |(b, i, c)| hidden[[b, i, c]]);
        if self.cfg.gen_tanh {
            out.mapv_inplace(f64::tanh);
        }
        Ok(out)
    }

    /// Reinitialize every linear layer (uniform default, then Glorot when
    /// configured).
    pub fn reset_parameters(&mut self) {
        for block in &mut self.blocks {
            block.reset_parameters(&mut self.rng);
        }
        if let Some(gain) = self.cfg.glorot {
            for block in &mut self.blocks {
                block.glorot_uniform(gain, &mut self.rng);
            }
        }
    }

    /// Copy all parameters from another generator by value, verifying the
    /// architectures match layer by layer. Used for EMA/backup snapshots.
    pub fn copy_parameters_from(&mut self, other: &Generator) -> Result<()> {
        if self.cfg != other.cfg {
            return Err(Error::ParameterMismatch(
                "generator configurations differ".into(),
            ));
        }
        copy_blocks(&mut self.blocks, &other.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GanConfig;

    fn base() -> GanConfig {
        GanConfig {
            num_hits: 6,
            node_feat_size: 3,
            hidden_node_size: 12,
            latent_node_size: Some(4),
            fe_layers: vec![16, 8],
            fn_layers: vec![16],
            mp_iters_gen: 2,
            ..GanConfig::default()
        }
    }

    #[test]
    fn output_shape_and_tanh_bound() {
        let mut gen = Generator::new(&base(), 42).unwrap();
        let noise = Array3::from_shape_fn((3, 6, 4), |(b, i, c)| {
            ((b * 31 + i * 7 + c) as f64).sin()
        });
        let out = gen.forward(&noise, None, false).unwrap();
        assert_eq!(out.dim(), (3, 6, 3));
        assert!(out.iter().all(|&v| (-1.0..=1.0).contains(&v)));
    }

    #[test]
    fn unbounded_without_tanh() {
        let cfg = GanConfig {
            gen_tanh: false,
            ..base()
        };
        let mut gen = Generator::new(&cfg, 42).unwrap();
        let noise = Array3::<f64>::ones((2, 6, 4));
        let out = gen.forward(&noise, None, false).unwrap();
        assert_eq!(out.dim(), (2, 6, 3));
    }

    #[test]
    fn wrong_latent_width_is_rejected() {
        let mut gen = Generator::new(&base(), 0).unwrap();
        let noise = Array3::<f64>::zeros((2, 6, 5));
        assert!(gen.forward(&noise, None, false).is_err());
    }

    #[test]
    fn forward_is_deterministic_in_eval_mode() {
        let mut gen = Generator::new(&base(), 3).unwrap();
        let noise = Array3::<f64>::ones((2, 6, 4));
        let a = gen.forward(&noise, None, false).unwrap();
        let b = gen.forward(&noise, None, false).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parameter_copy_matches_outputs() {
        let mut a = Generator::new(&base(), 1).unwrap();
        let mut b = Generator::new(&base(), 2).unwrap();
        let noise = Array3::from_shape_fn((2, 6, 4), |(b, i, c)| (b + i + c) as f64 * 0.1);

        let out_a = a.forward(&noise, None, false).unwrap();
        b.copy_parameters_from(&a).unwrap();
        let out_b = b.forward(&noise, None, false).unwrap();
        for (x, y) in out_a.iter().zip(out_b.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn parameter_copy_rejects_different_architectures() {
        let mut a = Generator::new(&base(), 1).unwrap();
        let other = GanConfig {
            hidden_node_size: 16,
            ..base()
        };
        let b = Generator::new(&other, 2).unwrap();
        assert!(a.copy_parameters_from(&b).is_err());
    }
}
