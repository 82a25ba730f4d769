//! Configuration for the graph GAN.
//!
//! Configuration is two-phase: a [`GanConfig`] holds the base
//! hyperparameters shared by both networks, and [`resolve`] turns it into an
//! immutable [`ResolvedConfig`] for one role with every derived layer width
//! computed up front. Networks are built from the resolved form only and
//! never mutate it, so a width read at forward time is always the width the
//! layers were built with.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which network a resolved configuration describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Latent point cloud in, synthesized point cloud out
    Generator,
    /// Point cloud in, per-sample realness score out
    Discriminator,
}

/// Coordinate system of the first feature channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordSystem {
    /// (x, y, z): three coordinate channels
    Cartesian,
    /// (eta, phi): two angular channels
    Polar,
    /// (eta_rel, phi_rel): two angular channels relative to the jet axis
    PolarRel,
}

impl CoordSystem {
    /// Number of coordinate channels entering pairwise differences.
    pub fn num_coords(&self) -> usize {
        match self {
            CoordSystem::Cartesian => 3,
            CoordSystem::Polar | CoordSystem::PolarRel => 2,
        }
    }
}

/// How aggregated messages are pooled over the second pair index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregation {
    Sum,
    Mean,
}

/// GAN loss family. Only the output squashing depends on it here: Wasserstein
/// and hinge losses consume unbounded scores, everything else gets a sigmoid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GanLoss {
    /// Binary cross entropy (original GAN objective)
    Bce,
    /// Least-squares GAN
    LeastSquares,
    /// Wasserstein critic
    Wasserstein,
    /// Hinge loss
    Hinge,
}

impl GanLoss {
    /// Whether discriminator outputs are squashed into `[0, 1]`.
    pub fn bounded_output(&self) -> bool {
        !matches!(self, GanLoss::Wasserstein | GanLoss::Hinge)
    }
}

/// Base architecture hyperparameters, shared by generator and discriminator.
///
/// Role-specific settings come in `_gen`/`_disc` pairs and are selected by
/// [`resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GanConfig {
    /// Points per cloud
    pub num_hits: usize,
    /// Feature channels per point in real data
    pub node_feat_size: usize,
    /// Hidden state width during message passing
    pub hidden_node_size: usize,
    /// Width of the generator's per-point input noise; `None` means the
    /// generator starts at full hidden width
    pub latent_node_size: Option<usize>,

    /// Edge MLP hidden/output widths (input width is derived)
    pub fe_layers: Vec<usize>,
    /// First-iteration edge MLP override for the generator; `None` reuses
    /// `fe_layers`
    pub fe1_layers_gen: Option<Vec<usize>>,
    /// First-iteration edge MLP override for the discriminator
    pub fe1_layers_disc: Option<Vec<usize>>,
    /// Node MLP hidden widths (input and output widths are derived)
    pub fn_layers: Vec<usize>,
    /// Discriminator aggregation head hidden widths
    pub fnd_layers: Vec<usize>,

    /// Message-passing iterations, generator
    pub mp_iters_gen: usize,
    /// Message-passing iterations, discriminator
    pub mp_iters_disc: usize,
    pub spectral_norm_gen: bool,
    pub spectral_norm_disc: bool,
    pub batch_norm_gen: bool,
    pub batch_norm_disc: bool,
    pub dropout_gen: f64,
    pub dropout_disc: f64,

    /// Build pairwise geometric features at all
    pub pos_diffs: bool,
    /// Include the raw coordinate difference channels
    pub coord_diffs: bool,
    /// Include the scalar pairwise distance channel
    pub delta_r: bool,
    pub coords: CoordSystem,

    /// Reserve the last feature channel as a validity mask and feed the
    /// second endpoint's mask into each edge
    pub mask: bool,
    /// Weight the discriminator's simple head by the input mask
    pub mask_weights: bool,

    /// Width of the conditional label vector (0 disables conditioning)
    pub label_dim: usize,
    /// Inject labels into the first iteration
    pub labels_first_iter: bool,
    /// Inject labels into every iteration after the first
    pub labels_hidden_iters: bool,

    /// Use the learned discriminator aggregation head (`fnd` stack) instead
    /// of the simple channel reduction
    pub dea: bool,
    /// Simple head only: sigmoid each point score before summing
    pub early_sigmoid: bool,
    /// Bound generator output with tanh
    pub gen_tanh: bool,
    pub loss: GanLoss,

    pub leaky_relu_alpha: f64,
    pub aggregation: Aggregation,
    /// Glorot-uniform initialization gain; `None` keeps the layers' default
    /// initialization
    pub glorot: Option<f64>,
}

impl Default for GanConfig {
    fn default() -> Self {
        Self {
            num_hits: 30,
            node_feat_size: 3,
            hidden_node_size: 32,
            latent_node_size: None,
            fe_layers: vec![96, 160, 192],
            fe1_layers_gen: None,
            fe1_layers_disc: None,
            fn_layers: vec![256, 256],
            fnd_layers: vec![256, 128],
            mp_iters_gen: 2,
            mp_iters_disc: 2,
            spectral_norm_gen: false,
            spectral_norm_disc: false,
            batch_norm_gen: false,
            batch_norm_disc: false,
            dropout_gen: 0.0,
            dropout_disc: 0.5,
            pos_diffs: false,
            coord_diffs: false,
            delta_r: false,
            coords: CoordSystem::PolarRel,
            mask: false,
            mask_weights: false,
            label_dim: 0,
            labels_first_iter: false,
            labels_hidden_iters: false,
            dea: true,
            early_sigmoid: false,
            gen_tanh: true,
            loss: GanLoss::Bce,
            leaky_relu_alpha: 0.2,
            aggregation: Aggregation::Sum,
            glorot: Some(1.0),
        }
    }
}

impl GanConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Serialize the configuration to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Parse(e.to_string()))
    }
}

/// Fully resolved, immutable architecture description for one role.
///
/// Every `*_widths` vector includes the layer stack's input width at position
/// 0, so `widths.windows(2)` enumerates the linear layers directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub role: Role,
    pub num_hits: usize,
    pub node_feat_size: usize,
    pub hidden_node_size: usize,
    /// Node state width entering the first iteration (latent width for the
    /// generator, raw feature width for the discriminator)
    pub first_node_size: usize,
    pub mp_iters: usize,

    pub spectral_norm: bool,
    pub batch_norm: bool,
    pub dropout: f64,
    pub leaky_relu_alpha: f64,
    pub aggregation: Aggregation,

    pub pos_diffs: bool,
    pub coord_diffs: bool,
    pub delta_r: bool,
    pub coords: CoordSystem,
    pub mask: bool,
    pub mask_weights: bool,
    /// Auxiliary geometric channel count appended to each pair
    pub aux_channels: usize,

    pub label_dim: usize,
    pub labels_first_iter: bool,
    pub labels_hidden_iters: bool,

    /// First-iteration edge MLP widths (input first)
    pub fe1_widths: Vec<usize>,
    /// Subsequent-iteration edge MLP widths
    pub fe_widths: Vec<usize>,
    /// First-iteration node MLP widths
    pub fn1_widths: Vec<usize>,
    /// Subsequent-iteration node MLP widths
    pub fn_widths: Vec<usize>,
    /// Discriminator aggregation head widths, present iff `dea`
    pub fnd_widths: Option<Vec<usize>>,

    pub dea: bool,
    pub early_sigmoid: bool,
    pub gen_tanh: bool,
    pub loss: GanLoss,
    pub glorot: Option<f64>,
}

impl ResolvedConfig {
    /// Whether labels are injected on the given iteration.
    pub fn labels_active(&self, iter: usize) -> bool {
        self.label_dim > 0
            && ((iter == 0 && self.labels_first_iter) || (iter > 0 && self.labels_hidden_iters))
    }

    /// Label channels counted into the given iteration's widths.
    pub fn label_channels(&self, iter: usize) -> usize {
        if self.labels_active(iter) {
            self.label_dim
        } else {
            0
        }
    }

    /// Edge MLP widths for the given iteration.
    pub fn edge_widths(&self, iter: usize) -> &[usize] {
        if iter == 0 {
            &self.fe1_widths
        } else {
            &self.fe_widths
        }
    }

    /// Node MLP widths for the given iteration.
    pub fn node_widths(&self, iter: usize) -> &[usize] {
        if iter == 0 {
            &self.fn1_widths
        } else {
            &self.fn_widths
        }
    }

    /// Node state width entering the given iteration.
    pub fn node_size(&self, iter: usize) -> usize {
        if iter == 0 {
            self.first_node_size
        } else {
            self.hidden_node_size
        }
    }

    /// Feature channel holding the validity mask.
    pub fn mask_channel(&self) -> usize {
        self.node_feat_size - 1
    }
}

/// Derive the full architecture for one role from a base configuration.
///
/// Pure: the same inputs always produce the same output, and nothing in the
/// base configuration is modified. All consistency requirements are checked
/// here so that network construction cannot observe a half-derived state.
pub fn resolve(cfg: &GanConfig, role: Role) -> Result<ResolvedConfig> {
    if cfg.num_hits == 0 {
        return Err(Error::Config("num_hits must be positive".into()));
    }
    if cfg.node_feat_size == 0 {
        return Err(Error::Config("node_feat_size must be positive".into()));
    }
    if cfg.hidden_node_size == 0 {
        return Err(Error::Config("hidden_node_size must be positive".into()));
    }
    if cfg.fe_layers.is_empty() {
        return Err(Error::Config("fe_layers must not be empty".into()));
    }
    if cfg.pos_diffs && !cfg.coord_diffs && !cfg.delta_r {
        return Err(Error::Config(
            "pos_diffs requires coord_diffs and/or delta_r".into(),
        ));
    }
    if (cfg.coord_diffs || cfg.delta_r) && !cfg.pos_diffs {
        return Err(Error::Config(
            "coord_diffs/delta_r require pos_diffs".into(),
        ));
    }
    if cfg.mask && cfg.node_feat_size < 2 {
        return Err(Error::Config(
            "mask requires at least two feature channels".into(),
        ));
    }
    if cfg.mask_weights && !cfg.mask {
        return Err(Error::Config("mask_weights requires mask".into()));
    }
    if (cfg.labels_first_iter || cfg.labels_hidden_iters) && cfg.label_dim == 0 {
        return Err(Error::Config(
            "label injection enabled but label_dim is 0".into(),
        ));
    }

    let (mp_iters, spectral_norm, batch_norm, dropout, fe1_override) = match role {
        Role::Generator => (
            cfg.mp_iters_gen,
            cfg.spectral_norm_gen,
            cfg.batch_norm_gen,
            cfg.dropout_gen,
            cfg.fe1_layers_gen.as_ref(),
        ),
        Role::Discriminator => (
            cfg.mp_iters_disc,
            cfg.spectral_norm_disc,
            cfg.batch_norm_disc,
            cfg.dropout_disc,
            cfg.fe1_layers_disc.as_ref(),
        ),
    };
    if mp_iters == 0 {
        return Err(Error::Config(format!(
            "mp_iters for {role:?} must be positive"
        )));
    }
    if !(0.0..1.0).contains(&dropout) {
        return Err(Error::Config(format!(
            "dropout {dropout} outside [0, 1)"
        )));
    }

    // Aggregation heads exist on the discriminator only.
    let dea = cfg.dea && role == Role::Discriminator;

    let first_node_size = match role {
        Role::Generator => cfg.latent_node_size.unwrap_or(cfg.hidden_node_size),
        Role::Discriminator => cfg.node_feat_size,
    };
    if first_node_size == 0 {
        return Err(Error::Config("latent_node_size must be positive".into()));
    }

    // Auxiliary geometric channels per ordered pair.
    let mut aux_channels = 0;
    if cfg.pos_diffs {
        if cfg.coord_diffs {
            aux_channels += cfg.coords.num_coords();
        }
        if cfg.delta_r {
            aux_channels += 1;
        }
    }
    if cfg.mask {
        aux_channels += 1;
    }

    if cfg.pos_diffs {
        let needed = cfg.coords.num_coords();
        if first_node_size < needed || cfg.hidden_node_size < needed {
            return Err(Error::Config(format!(
                "pos_diffs needs at least {needed} channels in every node state"
            )));
        }
    }
    if cfg.mask {
        let slot = cfg.node_feat_size - 1;
        if first_node_size <= slot || cfg.hidden_node_size <= slot {
            return Err(Error::Config(format!(
                "mask channel {slot} out of range of some node state"
            )));
        }
    }

    let label_channels_first = if cfg.label_dim > 0 && cfg.labels_first_iter {
        cfg.label_dim
    } else {
        0
    };
    let label_channels_hidden = if cfg.label_dim > 0 && cfg.labels_hidden_iters {
        cfg.label_dim
    } else {
        0
    };

    let fe1_stack = fe1_override.unwrap_or(&cfg.fe_layers);
    if fe1_stack.is_empty() {
        return Err(Error::Config("first-iteration fe stack is empty".into()));
    }

    let mut fe1_widths = Vec::with_capacity(fe1_stack.len() + 1);
    fe1_widths.push(2 * first_node_size + aux_channels + label_channels_first);
    fe1_widths.extend_from_slice(fe1_stack);

    let mut fe_widths = Vec::with_capacity(cfg.fe_layers.len() + 1);
    fe_widths.push(2 * cfg.hidden_node_size + aux_channels + label_channels_hidden);
    fe_widths.extend_from_slice(&cfg.fe_layers);

    let fe1_out = *fe1_widths.last().expect("non-empty");
    let fe_out = *fe_widths.last().expect("non-empty");

    let mut fn1_widths = Vec::with_capacity(cfg.fn_layers.len() + 2);
    fn1_widths.push(fe1_out + first_node_size + label_channels_first);
    fn1_widths.extend_from_slice(&cfg.fn_layers);
    fn1_widths.push(cfg.hidden_node_size);

    let mut fn_widths = Vec::with_capacity(cfg.fn_layers.len() + 2);
    fn_widths.push(fe_out + cfg.hidden_node_size + label_channels_hidden);
    fn_widths.extend_from_slice(&cfg.fn_layers);
    fn_widths.push(cfg.hidden_node_size);

    let fnd_widths = if dea {
        let mut w = Vec::with_capacity(cfg.fnd_layers.len() + 2);
        w.push(cfg.hidden_node_size);
        w.extend_from_slice(&cfg.fnd_layers);
        w.push(1);
        Some(w)
    } else {
        None
    };

    if fe1_widths
        .iter()
        .chain(&fe_widths)
        .chain(&fn1_widths)
        .chain(&fn_widths)
        .chain(fnd_widths.iter().flatten())
        .any(|&w| w == 0)
    {
        return Err(Error::Config("layer stack contains a zero width".into()));
    }

    Ok(ResolvedConfig {
        role,
        num_hits: cfg.num_hits,
        node_feat_size: cfg.node_feat_size,
        hidden_node_size: cfg.hidden_node_size,
        first_node_size,
        mp_iters,
        spectral_norm,
        batch_norm,
        dropout,
        leaky_relu_alpha: cfg.leaky_relu_alpha,
        aggregation: cfg.aggregation,
        pos_diffs: cfg.pos_diffs,
        coord_diffs: cfg.coord_diffs,
        delta_r: cfg.delta_r,
        coords: cfg.coords,
        mask: cfg.mask,
        mask_weights: cfg.mask_weights,
        aux_channels,
        label_dim: cfg.label_dim,
        labels_first_iter: cfg.labels_first_iter,
        labels_hidden_iters: cfg.labels_hidden_iters,
        fe1_widths,
        fe_widths,
        fn1_widths,
        fn_widths,
        fnd_widths,
        dea,
        early_sigmoid: cfg.early_sigmoid,
        gen_tanh: cfg.gen_tanh,
        loss: cfg.loss,
        glorot: cfg.glorot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_resolves_for_both_roles() {
        let cfg = GanConfig::default();
        let gen = resolve(&cfg, Role::Generator).unwrap();
        let disc = resolve(&cfg, Role::Discriminator).unwrap();

        assert_eq!(gen.first_node_size, cfg.hidden_node_size);
        assert_eq!(disc.first_node_size, cfg.node_feat_size);
        assert!(gen.fnd_widths.is_none());
        assert!(disc.fnd_widths.is_some());
    }

    #[test]
    fn edge_input_widths_follow_the_formula() {
        let cfg = GanConfig {
            latent_node_size: Some(16),
            pos_diffs: true,
            coord_diffs: true,
            delta_r: true,
            coords: CoordSystem::Polar,
            mask: false,
            label_dim: 5,
            labels_first_iter: true,
            labels_hidden_iters: true,
            ..GanConfig::default()
        };

        // anc = 2 (coord diffs, polar) + 1 (delta r) = 3
        let gen = resolve(&cfg, Role::Generator).unwrap();
        assert_eq!(gen.aux_channels, 3);
        assert_eq!(gen.fe1_widths[0], 2 * 16 + 3 + 5);
        assert_eq!(gen.fe_widths[0], 2 * cfg.hidden_node_size + 3 + 5);

        let disc = resolve(&cfg, Role::Discriminator).unwrap();
        assert_eq!(disc.fe1_widths[0], 2 * cfg.node_feat_size + 3 + 5);
        assert_eq!(disc.fe_widths[0], 2 * cfg.hidden_node_size + 3 + 5);
    }

    #[test]
    fn node_update_widths_follow_the_formula() {
        let cfg = GanConfig {
            latent_node_size: Some(16),
            label_dim: 2,
            labels_first_iter: true,
            labels_hidden_iters: false,
            ..GanConfig::default()
        };
        let gen = resolve(&cfg, Role::Generator).unwrap();

        let fe1_out = *cfg.fe_layers.last().unwrap();
        assert_eq!(gen.fn1_widths[0], fe1_out + 16 + 2);
        assert_eq!(gen.fn_widths[0], fe1_out + cfg.hidden_node_size);
        assert_eq!(*gen.fn1_widths.last().unwrap(), cfg.hidden_node_size);
        assert_eq!(*gen.fn_widths.last().unwrap(), cfg.hidden_node_size);
    }

    #[test]
    fn mask_adds_one_aux_channel() {
        let cfg = GanConfig {
            node_feat_size: 4,
            pos_diffs: true,
            delta_r: true,
            mask: true,
            ..GanConfig::default()
        };
        let disc = resolve(&cfg, Role::Discriminator).unwrap();
        assert_eq!(disc.aux_channels, 2);
        assert_eq!(disc.mask_channel(), 3);
    }

    #[test]
    fn dea_is_forced_off_for_the_generator() {
        let cfg = GanConfig {
            dea: true,
            ..GanConfig::default()
        };
        let gen = resolve(&cfg, Role::Generator).unwrap();
        assert!(!gen.dea);
        assert!(gen.fnd_widths.is_none());
    }

    #[test]
    fn fnd_widths_are_bracketed_by_hidden_and_one() {
        let cfg = GanConfig::default();
        let disc = resolve(&cfg, Role::Discriminator).unwrap();
        let fnd = disc.fnd_widths.unwrap();
        assert_eq!(fnd[0], cfg.hidden_node_size);
        assert_eq!(*fnd.last().unwrap(), 1);
    }

    #[test]
    fn inconsistent_configs_fail_loudly() {
        let bad = GanConfig {
            pos_diffs: true,
            ..GanConfig::default()
        };
        assert!(resolve(&bad, Role::Generator).is_err());

        let bad = GanConfig {
            mask_weights: true,
            ..GanConfig::default()
        };
        assert!(resolve(&bad, Role::Discriminator).is_err());

        let bad = GanConfig {
            labels_first_iter: true,
            label_dim: 0,
            ..GanConfig::default()
        };
        assert!(resolve(&bad, Role::Generator).is_err());

        let bad = GanConfig {
            mp_iters_disc: 0,
            ..GanConfig::default()
        };
        assert!(resolve(&bad, Role::Discriminator).is_err());
        assert!(resolve(&bad, Role::Generator).is_ok());
    }

    #[test]
    fn resolution_is_pure() {
        let cfg = GanConfig {
            pos_diffs: true,
            delta_r: true,
            ..GanConfig::default()
        };
        let a = resolve(&cfg, Role::Discriminator).unwrap();
        let b = resolve(&cfg, Role::Discriminator).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn json_round_trip() {
        let cfg = GanConfig {
            loss: GanLoss::Wasserstein,
            coords: CoordSystem::Cartesian,
            ..GanConfig::default()
        };
        let json = cfg.to_json().unwrap();
        let back = GanConfig::from_json(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
