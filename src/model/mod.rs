//! Message-passing GAN networks.
//!
//! The generator and discriminator are separate concrete types sharing
//! [`MessagePassingBlock`]; role differences live in construction
//! (`resolve`) and in the output heads, not in flags threaded through the
//! forward pass.

pub mod block;
pub mod discriminator;
pub mod generator;
pub mod layers;

pub use block::MessagePassingBlock;
pub use discriminator::Discriminator;
pub use generator::Generator;
pub use layers::{BatchNorm, LinearLayer, LinearStack};

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::Rng;

use crate::config::ResolvedConfig;
use crate::error::{Error, Result};

/// Build the block stack for a resolved configuration.
fn build_blocks<R: Rng>(cfg: &ResolvedConfig, rng: &mut R) -> Vec<MessagePassingBlock> {
    (0..cfg.mp_iters)
        .map(|i| MessagePassingBlock::new(cfg, i, rng))
        .collect()
}

/// Run the full message-passing stack.
fn run_blocks(
    cfg: &ResolvedConfig,
    blocks: &mut [MessagePassingBlock],
    x: &Array3<f64>,
    labels: Option<&Array2<f64>>,
    training: bool,
    rng: &mut StdRng,
) -> Result<Array3<f64>> {
    let mut state = x.clone();
    for block in blocks.iter_mut() {
        state = block.forward(cfg, &state, labels, training, rng)?;
    }
    Ok(state)
}

/// Copy every layer of `src` into `dst`, verifying layer counts and
/// parameter shapes. `what` names the stack in error messages.
fn copy_stack(dst: &mut LinearStack, src: &LinearStack, what: &str) -> Result<()> {
    if dst.num_layers() != src.num_layers() {
        return Err(Error::ParameterMismatch(format!(
            "{what}: {} layers vs {}",
            dst.num_layers(),
            src.num_layers()
        )));
    }
    for (k, (d, s)) in dst
        .layers_mut()
        .iter_mut()
        .zip(src.layers())
        .enumerate()
    {
        d.copy_parameters_from(s)
            .map_err(|e| Error::ParameterMismatch(format!("{what} layer {k}: {e}")))?;
    }
    Ok(())
}

/// Copy all block parameters of `src` into `dst`.
fn copy_blocks(dst: &mut [MessagePassingBlock], src: &[MessagePassingBlock]) -> Result<()> {
    if dst.len() != src.len() {
        return Err(Error::ParameterMismatch(format!(
            "{} blocks vs {}",
            dst.len(),
            src.len()
        )));
    }
    for (i, (d, s)) in dst.iter_mut().zip(src).enumerate() {
        copy_stack(d.edge_mlp_mut(), s.edge_mlp(), &format!("block {i} edge MLP"))?;
        copy_stack(d.node_mlp_mut(), s.node_mlp(), &format!("block {i} node MLP"))?;
    }
    Ok(())
}
