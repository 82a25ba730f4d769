//! One message-passing iteration.
//!
//! Every ordered pair of points in a sample is turned into an edge input
//! (both endpoint states, optional geometric features, optional labels), run
//! through the edge MLP, aggregated over the second endpoint, and fed with
//! the previous state through the node MLP to produce the next hidden state.

use ndarray::{Array2, Array3};
use rand::Rng;

use crate::config::{Aggregation, ResolvedConfig};
use crate::error::{Error, Result};
use crate::model::layers::LinearStack;

/// Componentwise epsilon added before the pairwise norm so zero-distance
/// pairs keep a finite gradient.
const NORM_EPS: f64 = 1e-12;

/// A single message-passing block (edge MLP + node MLP).
#[derive(Debug, Clone)]
pub struct MessagePassingBlock {
    /// True for the block occupying iteration 0, which may have different
    /// layer widths than all later iterations
    first: bool,
    edge_mlp: LinearStack,
    node_mlp: LinearStack,
}

impl MessagePassingBlock {
    /// Build the block for the given iteration index.
    pub fn new<R: Rng>(cfg: &ResolvedConfig, iter: usize, rng: &mut R) -> Self {
        let idx = iter.min(1);
        Self {
            first: iter == 0,
            edge_mlp: LinearStack::from_widths(
                cfg.edge_widths(idx),
                cfg.spectral_norm,
                cfg.batch_norm,
                rng,
            ),
            node_mlp: LinearStack::from_widths(
                cfg.node_widths(idx),
                cfg.spectral_norm,
                cfg.batch_norm,
                rng,
            ),
        }
    }

    /// Iteration index used for width and label lookups (0 or 1).
    fn iter_idx(&self) -> usize {
        if self.first {
            0
        } else {
            1
        }
    }

    /// `(batch, num_hits, node_size) -> (batch, num_hits, hidden_node_size)`
    pub fn forward<R: Rng>(
        &mut self,
        cfg: &ResolvedConfig,
        x: &Array3<f64>,
        labels: Option<&Array2<f64>>,
        training: bool,
        rng: &mut R,
    ) -> Result<Array3<f64>> {
        let idx = self.iter_idx();
        let (batch, hits, node_size) = x.dim();
        if hits != cfg.num_hits || node_size != cfg.node_size(idx) {
            return Err(Error::Shape {
                expected: format!("(_, {}, {})", cfg.num_hits, cfg.node_size(idx)),
                actual: format!("({batch}, {hits}, {node_size})"),
            });
        }

        let labels_active = cfg.labels_active(idx);
        let labels = if labels_active {
            let l = labels.ok_or_else(|| Error::Shape {
                expected: format!("labels (_, {})", cfg.label_dim),
                actual: "no labels".into(),
            })?;
            if l.dim() != (batch, cfg.label_dim) {
                return Err(Error::Shape {
                    expected: format!("({batch}, {})", cfg.label_dim),
                    actual: format!("{:?}", l.dim()),
                });
            }
            Some(l)
        } else {
            None
        };
        let label_channels = cfg.label_channels(idx);

        // The resolved width must match the concatenation we are about to
        // build; anything else is a configuration bug.
        let fe_in = self.edge_mlp.in_features();
        if fe_in != 2 * node_size + cfg.aux_channels + label_channels {
            return Err(Error::Shape {
                expected: format!("edge input {fe_in}"),
                actual: format!(
                    "2*{node_size} + {} + {label_channels}",
                    cfg.aux_channels
                ),
            });
        }

        let n = hits;
        let edge_in = self.edge_inputs(cfg, x, labels);

        let messages = self.edge_mlp.forward_activated(
            edge_in,
            cfg.leaky_relu_alpha,
            cfg.dropout,
            training,
            rng,
        );
        let fe_out = self.edge_mlp.out_features();

        // Aggregate messages over the second endpoint.
        let mut aggregated = Array2::<f64>::zeros((batch * n, fe_out));
        for b in 0..batch {
            for i in 0..n {
                let out_row = b * n + i;
                for j in 0..n {
                    let in_row = (b * n + i) * n + j;
                    for c in 0..fe_out {
                        aggregated[[out_row, c]] += messages[[in_row, c]];
                    }
                }
            }
        }
        if cfg.aggregation == Aggregation::Mean {
            aggregated /= n as f64;
        }

        // Node update input: aggregated message, previous state, labels.
        let fn_in = self.node_mlp.in_features();
        if fn_in != fe_out + node_size + label_channels {
            return Err(Error::Shape {
                expected: format!("node input {fn_in}"),
                actual: format!("{fe_out} + {node_size} + {label_channels}"),
            });
        }
        let mut node_in = Array2::<f64>::zeros((batch * n, fn_in));
        for b in 0..batch {
            for i in 0..n {
                let row = b * n + i;
                for c in 0..fe_out {
                    node_in[[row, c]] = aggregated[[row, c]];
                }
                for c in 0..node_size {
                    node_in[[row, fe_out + c]] = x[[b, i, c]];
                }
                if let Some(l) = labels {
                    for c in 0..cfg.label_dim {
                        node_in[[row, fe_out + node_size + c]] = l[[b, c]];
                    }
                }
            }
        }

        let updated = self.node_mlp.forward_final_linear(
            node_in,
            cfg.leaky_relu_alpha,
            cfg.dropout,
            training,
            rng,
        );
        let hidden = cfg.hidden_node_size;
        debug_assert_eq!(updated.dim(), (batch * n, hidden));

        Ok(Array3::from_shape_fn((batch, n, hidden), |(b, i, c)| {
            updated[[b * n + i, c]]
        }))
    }

    /// Assemble the edge-input matrix, one row per ordered pair `(i, j)` at
    /// row `(b·n + i)·n + j`: both endpoint states, then `x[j] − x[i]`
    /// coordinate differences, the pairwise distance, the second endpoint's
    /// mask value, and labels, in that column order.
    fn edge_inputs(
        &self,
        cfg: &ResolvedConfig,
        x: &Array3<f64>,
        labels: Option<&Array2<f64>>,
    ) -> Array2<f64> {
        let (batch, n, node_size) = x.dim();
        let fe_in = self.edge_mlp.in_features();
        let num_coords = cfg.coords.num_coords();
        let mask_ch = if cfg.mask { cfg.mask_channel() } else { 0 };

        let mut edge_in = Array2::<f64>::zeros((batch * n * n, fe_in));
        for b in 0..batch {
            for i in 0..n {
                for j in 0..n {
                    let row = (b * n + i) * n + j;
                    for c in 0..node_size {
                        edge_in[[row, c]] = x[[b, i, c]];
                        edge_in[[row, node_size + c]] = x[[b, j, c]];
                    }
                    let mut col = 2 * node_size;
                    if cfg.pos_diffs {
                        if cfg.coord_diffs {
                            for c in 0..num_coords {
                                edge_in[[row, col + c]] = x[[b, j, c]] - x[[b, i, c]];
                            }
                            col += num_coords;
                        }
                        if cfg.delta_r {
                            let mut sq = 0.0;
                            for c in 0..num_coords {
                                let d = x[[b, j, c]] - x[[b, i, c]] + NORM_EPS;
                                sq += d * d;
                            }
                            edge_in[[row, col]] = sq.sqrt();
                            col += 1;
                        }
                    }
                    if cfg.mask {
                        edge_in[[row, col]] = x[[b, j, mask_ch]];
                        col += 1;
                    }
                    if let Some(l) = labels {
                        for c in 0..cfg.label_dim {
                            edge_in[[row, col + c]] = l[[b, c]];
                        }
                    }
                }
            }
        }
        edge_in
    }

    pub fn edge_mlp(&self) -> &LinearStack {
        &self.edge_mlp
    }

    pub fn node_mlp(&self) -> &LinearStack {
        &self.node_mlp
    }

    pub fn edge_mlp_mut(&mut self) -> &mut LinearStack {
        &mut self.edge_mlp
    }

    pub fn node_mlp_mut(&mut self) -> &mut LinearStack {
        &mut self.node_mlp
    }

    pub fn glorot_uniform<R: Rng>(&mut self, gain: f64, rng: &mut R) {
        self.edge_mlp.glorot_uniform(gain, rng);
        self.node_mlp.glorot_uniform(gain, rng);
    }

    pub fn reset_parameters<R: Rng>(&mut self, rng: &mut R) {
        self.edge_mlp.reset_parameters(rng);
        self.node_mlp.reset_parameters(rng);
    }
}
