//! # Message-Passing GAN for Jet Point Clouds
//!
//! This library implements a message-passing graph GAN for particle-physics
//! jets represented as point clouds, together with the distributional
//! metrics used to judge generated samples against real data.
//!
//! ## Modules
//!
//! - `config`: Hyperparameter surface and two-phase width resolution
//! - `model`: Message-passing blocks, generator, and discriminator
//! - `eval`: Fréchet, Jensen-Shannon, and earth-mover metric cycles
//! - `error`: Library error type
//!
//! Every network owns a seeded RNG, so forward passes and metric cycles are
//! reproducible end to end.

pub mod config;
pub mod error;
pub mod eval;
pub mod model;

pub use config::{resolve, Aggregation, CoordSystem, GanConfig, GanLoss, ResolvedConfig, Role};
pub use error::{Error, Result};
pub use eval::{
    evaluate_jsd, evaluate_w1, fid, frechet_distance, population_stats, sample_generator,
    sample_latent, subsample, wasserstein_1d, EvalConfig, FeatureExtractor, LorentzVector,
    MetricHistory, PopulationStats, ProjectionExtractor, StatsCache,
};
pub use model::{Discriminator, Generator, LinearLayer, LinearStack, MessagePassingBlock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
