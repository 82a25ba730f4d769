//! Sample sources for the metric cycles: batched generator output and
//! subsamples of the real dataset, all driven by an injected RNG.

use ndarray::{concatenate, s, Array3, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};
use crate::model::Generator;

/// Standard-normal latent cloud of shape `(num_samples, num_hits, width)`.
pub fn sample_latent(
    num_samples: usize,
    num_hits: usize,
    width: usize,
    rng: &mut StdRng,
) -> Array3<f64> {
    let normal = Normal::new(0.0, 1.0).unwrap();
    Array3::from_shape_fn((num_samples, num_hits, width), |_| normal.sample(rng))
}

/// Generate exactly `num_samples` clouds by repeated `batch_size` rounds,
/// truncating the final round.
pub fn sample_generator(
    generator: &mut Generator,
    num_samples: usize,
    batch_size: usize,
    rng: &mut StdRng,
) -> Result<Array3<f64>> {
    if num_samples == 0 || batch_size == 0 {
        return Err(Error::Config(
            "num_samples and batch_size must be positive".into(),
        ));
    }
    let hits = generator.config().num_hits;
    let width = generator.config().first_node_size;

    let mut batches = Vec::new();
    let mut collected = 0;
    while collected < num_samples {
        let noise = sample_latent(batch_size, hits, width, rng);
        batches.push(generator.forward(&noise, None, false)?);
        collected += batch_size;
    }
    let views: Vec<_> = batches.iter().map(|a| a.view()).collect();
    let all = concatenate(Axis(0), &views).expect("batch shapes match");
    Ok(all.slice(s![..num_samples, .., ..]).to_owned())
}

/// Uniform subsample of `n` clouds from the real dataset, with or without
/// replacement.
pub fn subsample(
    data: &Array3<f64>,
    n: usize,
    replace: bool,
    rng: &mut StdRng,
) -> Result<Array3<f64>> {
    let (total, hits, feat) = data.dim();
    if total == 0 {
        return Err(Error::InsufficientData("empty dataset".into()));
    }
    if !replace && n > total {
        return Err(Error::InsufficientData(format!(
            "cannot draw {n} of {total} without replacement"
        )));
    }
    let indices: Vec<usize> = if replace {
        (0..n).map(|_| rng.gen_range(0..total)).collect()
    } else {
        rand::seq::index::sample(rng, total, n).into_vec()
    };
    Ok(Array3::from_shape_fn((n, hits, feat), |(s, i, c)| {
        data[[indices[s], i, c]]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GanConfig;
    use rand::SeedableRng;

    fn small_generator() -> Generator {
        let cfg = GanConfig {
            num_hits: 5,
            node_feat_size: 3,
            hidden_node_size: 8,
            latent_node_size: Some(4),
            fe_layers: vec![8],
            fn_layers: vec![8],
            mp_iters_gen: 1,
            ..GanConfig::default()
        };
        Generator::new(&cfg, 0).unwrap()
    }

    #[test]
    fn generated_count_is_exact() {
        let mut gen = small_generator();
        let mut rng = StdRng::seed_from_u64(1);
        // 30 is not a multiple of 8: final batch must be truncated.
        let out = sample_generator(&mut gen, 30, 8, &mut rng).unwrap();
        assert_eq!(out.dim(), (30, 5, 3));
    }

    #[test]
    fn subsample_without_replacement_has_unique_rows() {
        let data = Array3::from_shape_fn((20, 2, 1), |(s, _, _)| s as f64);
        let mut rng = StdRng::seed_from_u64(2);
        let drawn = subsample(&data, 20, false, &mut rng).unwrap();
        let mut ids: Vec<i64> = (0..20).map(|s| drawn[[s, 0, 0]] as i64).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 20);
    }

    #[test]
    fn oversized_draw_without_replacement_fails() {
        let data = Array3::<f64>::zeros((5, 2, 1));
        let mut rng = StdRng::seed_from_u64(3);
        assert!(subsample(&data, 6, false, &mut rng).is_err());
        assert!(subsample(&data, 6, true, &mut rng).is_ok());
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let mut gen_a = small_generator();
        let mut gen_b = small_generator();
        let mut rng_a = StdRng::seed_from_u64(9);
        let mut rng_b = StdRng::seed_from_u64(9);
        let a = sample_generator(&mut gen_a, 10, 4, &mut rng_a).unwrap();
        let b = sample_generator(&mut gen_b, 10, 4, &mut rng_b).unwrap();
        assert_eq!(a, b);
    }
}
