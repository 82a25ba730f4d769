//! Earth-mover (1-Wasserstein) distance on raw coordinates and derived jet
//! observables.
//!
//! For every requested sample size `n` the draw-and-compare cycle runs
//! `100_000 / n` times (a fixed total-sample budget, so bigger draws get
//! fewer repeats), comparing flattened per-channel coordinate arrays and,
//! optionally, per-jet invariant mass and transverse momentum obtained by
//! summing particle four-vectors.

use ndarray::Array3;
use rand::rngs::StdRng;
use tracing::info;

use crate::error::{Error, Result};
use crate::eval::sampling::{sample_generator, subsample};
use crate::eval::{column_mean_std, EvalConfig, MetricHistory};
use crate::model::Generator;

/// Total samples spent per requested size, spread over the repeats.
const TOTAL_SAMPLE_BUDGET: usize = 100_000;

/// 1-D earth-mover distance between two empirical distributions, in the
/// CDF-difference form: the integral of `|F_u - F_v|` over the merged
/// support. Exactly zero for identical samples.
pub fn wasserstein_1d(u: &[f64], v: &[f64]) -> f64 {
    assert!(!u.is_empty() && !v.is_empty(), "empty sample");
    let mut us = u.to_vec();
    let mut vs = v.to_vec();
    us.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    vs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut all = Vec::with_capacity(us.len() + vs.len());
    all.extend_from_slice(&us);
    all.extend_from_slice(&vs);
    all.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let nu = us.len() as f64;
    let nv = vs.len() as f64;
    let mut total = 0.0;
    for k in 0..all.len() - 1 {
        let delta = all[k + 1] - all[k];
        if delta == 0.0 {
            continue;
        }
        let cdf_u = us.partition_point(|&x| x <= all[k]) as f64 / nu;
        let cdf_v = vs.partition_point(|&x| x <= all[k]) as f64 / nv;
        total += (cdf_u - cdf_v).abs() * delta;
    }
    total
}

/// Minimal Lorentz four-vector for jet-observable reconstruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct LorentzVector {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub e: f64,
}

impl LorentzVector {
    /// Build from transverse momentum, pseudorapidity, azimuth and mass.
    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, m: f64) -> Self {
        let px = pt * phi.cos();
        let py = pt * phi.sin();
        let pz = pt * eta.sinh();
        let p = pt * eta.cosh();
        Self {
            px,
            py,
            pz,
            e: (p * p + m * m).sqrt(),
        }
    }

    /// Transverse momentum.
    pub fn pt(&self) -> f64 {
        (self.px * self.px + self.py * self.py).sqrt()
    }

    /// Invariant mass; spacelike numerical noise is clamped to zero.
    pub fn mass(&self) -> f64 {
        let m2 = self.e * self.e - self.px * self.px - self.py * self.py - self.pz * self.pz;
        m2.max(0.0).sqrt()
    }
}

impl std::ops::Add for LorentzVector {
    type Output = LorentzVector;

    fn add(self, rhs: LorentzVector) -> LorentzVector {
        LorentzVector {
            px: self.px + rhs.px,
            py: self.py + rhs.py,
            pz: self.pz + rhs.pz,
            e: self.e + rhs.e,
        }
    }
}

/// Per-jet observables `(mass, pt)` from summed massless particle
/// four-vectors. Particle channels are `(eta, phi, pt)`.
pub fn jet_observables(clouds: &Array3<f64>) -> Vec<(f64, f64)> {
    let (n, hits, _) = clouds.dim();
    (0..n)
        .map(|s| {
            let mut jet = LorentzVector::default();
            for i in 0..hits {
                jet = jet
                    + LorentzVector::from_pt_eta_phi_m(
                        clouds[[s, i, 2]],
                        clouds[[s, i, 0]],
                        clouds[[s, i, 1]],
                        0.0,
                    );
            }
            (jet.mass(), jet.pt())
        })
        .collect()
}

fn channel_values(clouds: &Array3<f64>, ch: usize) -> Vec<f64> {
    clouds
        .slice(ndarray::s![.., .., ch])
        .iter()
        .copied()
        .collect()
}

/// Run the earth-mover cycle for every requested sample size, appending
/// per-channel means and standard deviations to the externally owned metric
/// history under `w1_{n}m` / `w1_{n}std` (and `w1j_*` for jet observables).
pub fn evaluate_w1(
    generator: &mut Generator,
    real: &Array3<f64>,
    eval_cfg: &EvalConfig,
    rng: &mut StdRng,
    results: &mut MetricHistory,
) -> Result<()> {
    if real.dim().2 < 3 {
        return Err(Error::Config(
            "earth-mover cycle needs 3 coordinate channels".into(),
        ));
    }

    for &n in &eval_cfg.w1_num_samples {
        let repeats = (TOTAL_SAMPLE_BUDGET / n).max(1);
        info!(num_samples = n, repeats, "evaluating 1-WD");

        let mut w1s: Vec<Vec<f64>> = Vec::with_capacity(repeats);
        let mut w1js: Vec<Vec<f64>> = Vec::with_capacity(repeats);

        for _ in 0..repeats {
            let gen_out = sample_generator(generator, n, eval_cfg.batch_size, rng)?;
            let sample = subsample(real, n, true, rng)?;

            let per_channel: Vec<f64> = (0..3)
                .map(|ch| {
                    wasserstein_1d(&channel_values(&sample, ch), &channel_values(&gen_out, ch))
                })
                .collect();
            w1s.push(per_channel);

            if eval_cfg.jet_features {
                let real_jets = jet_observables(&sample);
                let gen_jets = jet_observables(&gen_out);
                let real_mass: Vec<f64> = real_jets.iter().map(|j| j.0).collect();
                let gen_mass: Vec<f64> = gen_jets.iter().map(|j| j.0).collect();
                let real_pt: Vec<f64> = real_jets.iter().map(|j| j.1).collect();
                let gen_pt: Vec<f64> = gen_jets.iter().map(|j| j.1).collect();
                w1js.push(vec![
                    wasserstein_1d(&real_mass, &gen_mass),
                    wasserstein_1d(&real_pt, &gen_pt),
                ]);
            }
        }

        let (mean, std) = column_mean_std(&w1s);
        results.entry(format!("w1_{n}m")).or_default().push(mean);
        results.entry(format!("w1_{n}std")).or_default().push(std);

        if eval_cfg.jet_features {
            let (mean, std) = column_mean_std(&w1js);
            results.entry(format!("w1j_{n}m")).or_default().push(mean);
            results.entry(format!("w1j_{n}std")).or_default().push(std);
        }
    }
    Ok(())
}
