//! Jensen-Shannon divergence on per-channel coordinate histograms.
//!
//! Each of the three coordinate channels is binned into fixed, pre-declared
//! edges (the angular channels at 0.02 resolution, the momentum channel at
//! 0.01), normalized to densities, and compared with the Jensen-Shannon
//! distance. The draw-and-compare cycle runs ten times with fresh samples
//! and reports per-channel mean and standard deviation.

use ndarray::Array3;
use rand::rngs::StdRng;
use tracing::info;

use crate::error::{Error, Result};
use crate::eval::sampling::{sample_generator, subsample};
use crate::eval::{column_mean_std, EvalConfig};
use crate::model::Generator;

/// Independent draw-and-compare repeats.
const NUM_REPEATS: usize = 10;

/// Half-open range `[start, stop)` in steps of `step`, like `np.arange`.
pub fn bin_edges(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let mut edges = Vec::new();
    let mut k = 0;
    loop {
        let x = start + step * k as f64;
        if x >= stop {
            break;
        }
        edges.push(x);
        k += 1;
    }
    edges
}

/// The fixed bin edges for a coordinate channel.
pub fn channel_bins(channel: usize) -> Vec<f64> {
    if channel < 2 {
        bin_edges(-1.0, 1.0, 0.02)
    } else {
        bin_edges(-1.0, 1.0, 0.01)
    }
}

/// Histogram of `values` over the given edges, normalized to a density
/// (counts divided by in-range total times bin width). Out-of-range values
/// are ignored.
pub fn histogram_density(values: &[f64], edges: &[f64]) -> Vec<f64> {
    let bins = edges.len() - 1;
    let mut counts = vec![0usize; bins];
    for &v in values {
        if v < edges[0] || v > edges[bins] {
            continue;
        }
        // Rightmost bin is closed on both sides, as in np.histogram.
        let idx = edges[..bins]
            .partition_point(|&e| e <= v)
            .saturating_sub(1)
            .min(bins - 1);
        counts[idx] += 1;
    }
    let total: usize = counts.iter().sum();
    if total == 0 {
        return vec![0.0; bins];
    }
    counts
        .iter()
        .enumerate()
        .map(|(i, &c)| c as f64 / (total as f64 * (edges[i + 1] - edges[i])))
        .collect()
}

/// Jensen-Shannon distance between two histograms (square root of the
/// divergence, natural logarithm). Inputs are normalized to probability
/// vectors first; two all-zero histograms compare as identical.
pub fn jensen_shannon_distance(p: &[f64], q: &[f64]) -> f64 {
    assert_eq!(p.len(), q.len(), "histogram lengths differ");
    let sp: f64 = p.iter().sum();
    let sq: f64 = q.iter().sum();
    if sp == 0.0 && sq == 0.0 {
        return 0.0;
    }
    if sp == 0.0 || sq == 0.0 {
        return (std::f64::consts::LN_2).sqrt();
    }

    let mut js = 0.0;
    for (&pi, &qi) in p.iter().zip(q) {
        let pi = pi / sp;
        let qi = qi / sq;
        let m = 0.5 * (pi + qi);
        if pi > 0.0 {
            js += 0.5 * pi * (pi / m).ln();
        }
        if qi > 0.0 {
            js += 0.5 * qi * (qi / m).ln();
        }
    }
    js.max(0.0).sqrt()
}

/// Run the ten-repeat Jensen-Shannon cycle. Returns per-channel means and
/// standard deviations over the repeats.
pub fn evaluate_jsd(
    generator: &mut Generator,
    real: &Array3<f64>,
    eval_cfg: &EvalConfig,
    rng: &mut StdRng,
) -> Result<(Vec<f64>, Vec<f64>)> {
    if real.dim().2 < 3 {
        return Err(Error::Config(
            "Jensen-Shannon cycle needs 3 coordinate channels".into(),
        ));
    }
    info!(num_samples = eval_cfg.num_samples, "evaluating JSD");

    let mut repeats: Vec<Vec<f64>> = Vec::with_capacity(NUM_REPEATS);
    for _ in 0..NUM_REPEATS {
        let gen_out = sample_generator(generator, eval_cfg.num_samples, eval_cfg.batch_size, rng)?;
        let sample = subsample(real, eval_cfg.num_samples, false, rng)?;

        let mut per_channel = Vec::with_capacity(3);
        for ch in 0..3 {
            let edges = channel_bins(ch);
            let gen_vals: Vec<f64> = gen_out
                .slice(ndarray::s![.., .., ch])
                .iter()
                .copied()
                .collect();
            let real_vals: Vec<f64> = sample
                .slice(ndarray::s![.., .., ch])
                .iter()
                .copied()
                .collect();
            let h1 = histogram_density(&gen_vals, &edges);
            let h2 = histogram_density(&real_vals, &edges);
            per_channel.push(jensen_shannon_distance(&h1, &h2));
        }
        repeats.push(per_channel);
    }

    Ok(column_mean_std(&repeats))
}
