//! Linear-layer primitives shared by the edge and node MLPs.
//!
//! Spectral normalization is a construction-time property of a layer: the
//! spectral-norm estimate is refreshed whenever the weights change (init,
//! Glorot re-init, reset, parameter copy), so the forward pass stays `&self`
//! friendly and no layer is ever wrapped after the fact.

use ndarray::{Array1, Array2, Axis};
use rand::Rng;

use crate::error::{Error, Result};

const EPS: f64 = 1e-12;

/// Leaky ReLU with configurable negative slope.
pub fn leaky_relu(x: &Array2<f64>, alpha: f64) -> Array2<f64> {
    x.mapv(|v| if v > 0.0 { v } else { alpha * v })
}

/// Elementwise logistic sigmoid.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Inverted dropout: zero with probability `rate`, scale survivors by
/// `1 / (1 - rate)`. Identity when `rate` is 0.
pub fn apply_dropout<R: Rng>(x: &mut Array2<f64>, rate: f64, rng: &mut R) {
    if rate <= 0.0 {
        return;
    }
    let keep = 1.0 - rate;
    x.mapv_inplace(|v| {
        if rng.gen_range(0.0..1.0) < rate {
            0.0
        } else {
            v / keep
        }
    });
}

/// Largest-singular-value estimate by power iteration.
fn spectral_norm_estimate(w: &Array2<f64>, iters: usize) -> f64 {
    let n_out = w.ncols();
    let mut u = Array1::from_elem(n_out, 1.0 / (n_out as f64).sqrt());
    let mut sigma = 0.0;
    for _ in 0..iters {
        let v = w.dot(&u);
        let v_norm = v.dot(&v).sqrt().max(EPS);
        let v = v / v_norm;
        let u_new = w.t().dot(&v);
        sigma = u_new.dot(&u_new).sqrt();
        u = u_new / sigma.max(EPS);
    }
    sigma
}

/// A fully connected layer, optionally spectrally normalized.
///
/// Weights are stored `(in_features, out_features)` so the forward pass is
/// `x.dot(w) + b` on a `(rows, in_features)` batch.
#[derive(Debug, Clone)]
pub struct LinearLayer {
    pub in_features: usize,
    pub out_features: usize,
    weight: Array2<f64>,
    bias: Array1<f64>,
    spectral: bool,
    /// `1 / sigma(weight)` when spectrally normalized
    inv_sigma: f64,
}

impl LinearLayer {
    /// Create a layer with uniform `±1/sqrt(in_features)` weights and zero
    /// biases.
    pub fn new<R: Rng>(
        in_features: usize,
        out_features: usize,
        spectral: bool,
        rng: &mut R,
    ) -> Self {
        let mut layer = Self {
            in_features,
            out_features,
            weight: Array2::zeros((in_features, out_features)),
            bias: Array1::zeros(out_features),
            spectral,
            inv_sigma: 1.0,
        };
        layer.reset_parameters(rng);
        layer
    }

    /// Reinitialize to the default uniform scheme.
    pub fn reset_parameters<R: Rng>(&mut self, rng: &mut R) {
        let bound = 1.0 / (self.in_features as f64).sqrt();
        self.weight = Array2::from_shape_fn((self.in_features, self.out_features), |_| {
            rng.gen_range(-bound..bound)
        });
        self.bias.fill(0.0);
        self.renormalize();
    }

    /// Glorot/Xavier uniform re-initialization of the weights with the given
    /// gain. Biases are left at their current values.
    pub fn glorot_uniform<R: Rng>(&mut self, gain: f64, rng: &mut R) {
        let limit = gain * (6.0 / (self.in_features + self.out_features) as f64).sqrt();
        self.weight.mapv_inplace(|_| rng.gen_range(-limit..limit));
        self.renormalize();
    }

    /// `x (rows, in) -> (rows, out)`
    pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut y = x.dot(&self.weight);
        if self.spectral {
            y *= self.inv_sigma;
        }
        y + &self.bias
    }

    pub fn weight(&self) -> &Array2<f64> {
        &self.weight
    }

    pub fn bias(&self) -> &Array1<f64> {
        &self.bias
    }

    /// The weight actually applied at forward time (spectral scaling folded
    /// in).
    pub fn effective_weight(&self) -> Array2<f64> {
        if self.spectral {
            &self.weight * self.inv_sigma
        } else {
            self.weight.clone()
        }
    }

    /// Replace this layer's parameters by value, verifying shapes.
    pub fn copy_parameters_from(&mut self, other: &LinearLayer) -> Result<()> {
        if self.weight.dim() != other.weight.dim() {
            return Err(Error::ParameterMismatch(format!(
                "weight {:?} vs {:?}",
                self.weight.dim(),
                other.weight.dim()
            )));
        }
        self.weight.assign(&other.weight);
        self.bias.assign(&other.bias);
        self.renormalize();
        Ok(())
    }

    fn renormalize(&mut self) {
        if self.spectral {
            let sigma = spectral_norm_estimate(&self.weight, 100);
            self.inv_sigma = 1.0 / sigma.max(EPS);
        }
    }
}

/// Batch normalization over the feature axis of a `(rows, features)` batch.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    gamma: Array1<f64>,
    beta: Array1<f64>,
    running_mean: Array1<f64>,
    running_var: Array1<f64>,
    momentum: f64,
    eps: f64,
}

impl BatchNorm {
    pub fn new(num_features: usize) -> Self {
        Self {
            gamma: Array1::ones(num_features),
            beta: Array1::zeros(num_features),
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
            momentum: 0.1,
            eps: 1e-5,
        }
    }

    /// Normalize with batch statistics when training (updating the running
    /// estimates), with running statistics otherwise.
    pub fn forward(&mut self, x: &Array2<f64>, training: bool) -> Array2<f64> {
        let (mean, var) = if training {
            let mean = x.mean_axis(Axis(0)).expect("non-empty batch");
            let var = x.var_axis(Axis(0), 0.0);
            self.running_mean = &self.running_mean * (1.0 - self.momentum) + &mean * self.momentum;
            self.running_var = &self.running_var * (1.0 - self.momentum) + &var * self.momentum;
            (mean, var)
        } else {
            (self.running_mean.clone(), self.running_var.clone())
        };

        let mut y = x.clone();
        for (j, mut col) in y.axis_iter_mut(Axis(1)).enumerate() {
            let m = mean[j];
            let s = (var[j] + self.eps).sqrt();
            let g = self.gamma[j];
            let b = self.beta[j];
            col.mapv_inplace(|v| g * (v - m) / s + b);
        }
        y
    }
}

/// A stack of linear layers with the crate's activation / batch-norm /
/// dropout pattern, built directly from a resolved width vector.
#[derive(Debug, Clone)]
pub struct LinearStack {
    layers: Vec<LinearLayer>,
    norms: Option<Vec<BatchNorm>>,
}

impl LinearStack {
    /// Build from a width vector that includes the input width at position 0.
    pub fn from_widths<R: Rng>(
        widths: &[usize],
        spectral: bool,
        batch_norm: bool,
        rng: &mut R,
    ) -> Self {
        let layers: Vec<LinearLayer> = widths
            .windows(2)
            .map(|w| LinearLayer::new(w[0], w[1], spectral, rng))
            .collect();
        let norms = batch_norm.then(|| widths[1..].iter().map(|&w| BatchNorm::new(w)).collect());
        Self { layers, norms }
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn in_features(&self) -> usize {
        self.layers[0].in_features
    }

    pub fn out_features(&self) -> usize {
        self.layers[self.layers.len() - 1].out_features
    }

    /// Forward with leaky ReLU, optional batch norm, and dropout after every
    /// layer (edge-MLP pattern).
    pub fn forward_activated<R: Rng>(
        &mut self,
        x: Array2<f64>,
        alpha: f64,
        dropout: f64,
        training: bool,
        rng: &mut R,
    ) -> Array2<f64> {
        let mut x = x;
        for i in 0..self.layers.len() {
            x = leaky_relu(&self.layers[i].forward(&x), alpha);
            if let Some(norms) = self.norms.as_mut() {
                x = norms[i].forward(&x, training);
            }
            if training {
                apply_dropout(&mut x, dropout, rng);
            }
        }
        x
    }

    /// Forward with the node-MLP pattern: leaky ReLU / batch norm / dropout
    /// after every layer but the last, plain linear plus dropout on the last.
    pub fn forward_final_linear<R: Rng>(
        &mut self,
        x: Array2<f64>,
        alpha: f64,
        dropout: f64,
        training: bool,
        rng: &mut R,
    ) -> Array2<f64> {
        let mut x = x;
        let last = self.layers.len() - 1;
        for i in 0..last {
            x = leaky_relu(&self.layers[i].forward(&x), alpha);
            if let Some(norms) = self.norms.as_mut() {
                x = norms[i].forward(&x, training);
            }
            if training {
                apply_dropout(&mut x, dropout, rng);
            }
        }
        x = self.layers[last].forward(&x);
        if training {
            apply_dropout(&mut x, dropout, rng);
        }
        x
    }

    pub fn glorot_uniform<R: Rng>(&mut self, gain: f64, rng: &mut R) {
        for layer in &mut self.layers {
            layer.glorot_uniform(gain, rng);
        }
    }

    pub fn reset_parameters<R: Rng>(&mut self, rng: &mut R) {
        for layer in &mut self.layers {
            layer.reset_parameters(rng);
        }
    }

    pub fn layers(&self) -> &[LinearLayer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [LinearLayer] {
        &mut self.layers
    }
}
