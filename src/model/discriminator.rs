//! Discriminator: point cloud in, per-sample realness score out.

use ndarray::{Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{resolve, Aggregation, GanConfig, ResolvedConfig, Role};
use crate::error::{Error, Result};
use crate::model::layers::{sigmoid, LinearStack};
use crate::model::{build_blocks, copy_blocks, copy_stack, run_blocks, MessagePassingBlock};

/// Clamp for the mask-weight denominator so a fully masked sample scores
/// finite instead of NaN.
const MASK_DENOM_MIN: f64 = 1e-8;

/// Discriminator network.
///
/// After message passing the per-point hidden states are reduced to one
/// scalar per sample, either through the learned aggregation head (`dea`) or
/// by directly reducing hidden channel 0, optionally mask-weighted.
#[derive(Debug)]
pub struct Discriminator {
    cfg: ResolvedConfig,
    blocks: Vec<MessagePassingBlock>,
    head: Option<LinearStack>,
    rng: StdRng,
}

impl Discriminator {
    /// Resolve the base configuration for the discriminator role and build
    /// the network with a seeded RNG.
    pub fn new(base: &GanConfig, seed: u64) -> Result<Self> {
        Self::from_resolved(resolve(base, Role::Discriminator)?, seed)
    }

    /// Build from an already resolved configuration.
    pub fn from_resolved(cfg: ResolvedConfig, seed: u64) -> Result<Self> {
        if cfg.role != Role::Discriminator {
            return Err(Error::Config(
                "resolved configuration is not for the discriminator role".into(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut blocks = build_blocks(&cfg, &mut rng);
        let mut head = cfg
            .fnd_widths
            .as_ref()
            .map(|w| LinearStack::from_widths(w, cfg.spectral_norm, cfg.batch_norm, &mut rng));
        if let Some(gain) = cfg.glorot {
            for block in &mut blocks {
                block.glorot_uniform(gain, &mut rng);
            }
            if let Some(h) = head.as_mut() {
                h.glorot_uniform(gain, &mut rng);
            }
        }
        Ok(Self {
            cfg,
            blocks,
            head,
            rng,
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.cfg
    }

    /// Forward pass. `x` is `(batch, num_hits, node_feat_size)`; output is
    /// `(batch, 1)`, sigmoid-bounded unless the loss is Wasserstein or
    /// hinge.
    pub fn forward(
        &mut self,
        x: &Array3<f64>,
        labels: Option<&Array2<f64>>,
        training: bool,
    ) -> Result<Array2<f64>> {
        let (batch, hits, width) = x.dim();
        if hits != self.cfg.num_hits || width != self.cfg.node_feat_size {
            return Err(Error::Shape {
                expected: format!("(_, {}, {})", self.cfg.num_hits, self.cfg.node_feat_size),
                actual: format!("({batch}, {hits}, {width})"),
            });
        }

        // Mask weights come from the raw input, before message passing
        // replaces the features.
        let mask_weights = if self.cfg.mask_weights {
            let ch = self.cfg.mask_channel();
            Some(Array2::from_shape_fn((batch, hits), |(b, i)| {
                x[[b, i, ch]] + 0.5
            }))
        } else {
            None
        };

        let hidden = run_blocks(
            &self.cfg,
            &mut self.blocks,
            x,
            labels,
            training,
            &mut self.rng,
        )?;

        let scores = if let Some(head) = self.head.as_mut() {
            // Learned aggregation: pool the full hidden state over points,
            // then the fnd stack down to one unactivated scalar.
            let mut pooled = hidden.sum_axis(Axis(1));
            if self.cfg.aggregation == Aggregation::Mean {
                pooled /= hits as f64;
            }
            head.forward_final_linear(
                pooled,
                self.cfg.leaky_relu_alpha,
                self.cfg.dropout,
                training,
                &mut self.rng,
            )
        } else {
            // Simple reduction of hidden channel 0. Mask weighting applies
            // to the raw value; the early sigmoid squashes the weighted one.
            let early_sigmoid = self.cfg.early_sigmoid && self.cfg.loss.bounded_output();
            let mut out = Array2::<f64>::zeros((batch, 1));
            for b in 0..batch {
                let mut total = 0.0;
                for i in 0..hits {
                    let mut v = hidden[[b, i, 0]];
                    if let Some(w) = &mask_weights {
                        v *= w[[b, i]];
                    }
                    if early_sigmoid {
                        v = sigmoid(v);
                    }
                    total += v;
                }
                let denom = match &mask_weights {
                    Some(w) => w.row(b).sum().max(MASK_DENOM_MIN),
                    None => hits as f64,
                };
                out[[b, 0]] = total / denom;
            }
            out
        };

        let mut scores = scores;
        if self.cfg.loss.bounded_output() {
            scores.mapv_inplace(sigmoid);
        }
        Ok(scores)
    }

    /// Reinitialize every linear layer.
    pub fn reset_parameters(&mut self) {
        for block in &mut self.blocks {
            block.reset_parameters(&mut self.rng);
        }
        if let Some(h) = self.head.as_mut() {
            h.reset_parameters(&mut self.rng);
        }
        if let Some(gain) = self.cfg.glorot {
            for block in &mut self.blocks {
                block.glorot_uniform(gain, &mut self.rng);
            }
            if let Some(h) = self.head.as_mut() {
                h.glorot_uniform(gain, &mut self.rng);
            }
        }
    }

    /// Copy all parameters from another discriminator by value, verifying
    /// the architectures match layer by layer.
    pub fn copy_parameters_from(&mut self, other: &Discriminator) -> Result<()> {
        if self.cfg != other.cfg {
            return Err(Error::ParameterMismatch(
                "discriminator configurations differ".into(),
            ));
        }
        copy_blocks(&mut self.blocks, &other.blocks)?;
        match (self.head.as_mut(), other.head.as_ref()) {
            (Some(d), Some(s)) => copy_stack(d, s, "aggregation head"),
            (None, None) => Ok(()),
            _ => Err(Error::ParameterMismatch(
                "aggregation head present on one network only".into(),
            )),
        }
    }
}
