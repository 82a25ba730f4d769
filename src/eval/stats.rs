//! Population statistics of feature-extractor activations.
//!
//! The full dataset is embedded in fixed-size chunks (mirroring the
//! accelerator-side accumulation of the training setup: embed a chunk,
//! then move it into the host-side matrix before starting the next), and the
//! activation population is summarized by its mean vector and bias-corrected
//! covariance matrix. Statistics for real datasets are cached as plain-text
//! dumps so repeated evaluation runs skip the embedding pass.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{concatenate, s, Array1, Array2, Array3, Axis};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::eval::features::FeatureExtractor;

/// Mean and covariance of an activation population.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationStats {
    pub mu: Array1<f64>,
    pub sigma: Array2<f64>,
}

/// Sample mean over rows.
pub fn activation_mean(activations: &Array2<f64>) -> Array1<f64> {
    activations
        .mean_axis(Axis(0))
        .expect("non-empty activation matrix")
}

/// Bias-corrected covariance over rows (columns are features).
pub fn activation_covariance(activations: &Array2<f64>) -> Result<Array2<f64>> {
    let n = activations.nrows();
    if n < 2 {
        return Err(Error::InsufficientData(format!(
            "covariance needs at least 2 samples, got {n}"
        )));
    }
    let mean = activation_mean(activations);
    let centered = activations - &mean;
    Ok(centered.t().dot(&centered) / (n - 1) as f64)
}

/// Summarize a population of activations.
pub fn stats_of(activations: &Array2<f64>) -> Result<PopulationStats> {
    Ok(PopulationStats {
        mu: activation_mean(activations),
        sigma: activation_covariance(activations)?,
    })
}

/// Embed a dataset chunk by chunk and summarize the activation population.
///
/// `batch_size` samples are embedded per extractor call; `gpu_batch` calls
/// are accumulated per chunk before the chunk is flushed into the host-side
/// matrix. The result is independent of both sizes (the mean and covariance
/// do not care how the rows were grouped).
pub fn population_stats(
    extractor: &dyn FeatureExtractor,
    data: &Array3<f64>,
    batch_size: usize,
    gpu_batch: usize,
) -> Result<PopulationStats> {
    if batch_size == 0 || gpu_batch == 0 {
        return Err(Error::Config(
            "batch_size and gpu_batch must be positive".into(),
        ));
    }
    let n = data.dim().0;
    info!(samples = n, "computing activation statistics");

    let mut flushed: Vec<Array2<f64>> = Vec::new();
    let mut chunk: Vec<Array2<f64>> = Vec::new();
    let mut start = 0;
    while start < n {
        let end = (start + batch_size).min(n);
        let batch = data.slice(s![start..end, .., ..]).to_owned();
        chunk.push(extractor.embed(&batch)?);
        if chunk.len() == gpu_batch {
            let views: Vec<_> = chunk.iter().map(|a| a.view()).collect();
            flushed.push(concatenate(Axis(0), &views).expect("chunk widths match"));
            chunk.clear();
        }
        start = end;
    }
    if !chunk.is_empty() {
        let views: Vec<_> = chunk.iter().map(|a| a.view()).collect();
        flushed.push(concatenate(Axis(0), &views).expect("chunk widths match"));
    }

    let views: Vec<_> = flushed.iter().map(|a| a.view()).collect();
    let activations = concatenate(Axis(0), &views)
        .map_err(|_| Error::InsufficientData("empty dataset".into()))?;
    stats_of(&activations)
}

fn write_vector(path: &Path, v: &Array1<f64>) -> Result<()> {
    let mut out = String::with_capacity(v.len() * 24);
    for x in v {
        out.push_str(&format!("{x:.17e}\n"));
    }
    fs::write(path, out)?;
    Ok(())
}

fn write_matrix(path: &Path, m: &Array2<f64>) -> Result<()> {
    let mut out = String::with_capacity(m.len() * 24);
    for row in m.rows() {
        let line: Vec<String> = row.iter().map(|x| format!("{x:.17e}")).collect();
        out.push_str(&line.join(" "));
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

fn read_vector(path: &Path) -> Result<Array1<f64>> {
    let text = fs::read_to_string(path)?;
    let values: std::result::Result<Vec<f64>, _> =
        text.split_whitespace().map(str::parse::<f64>).collect();
    let values = values.map_err(|e| Error::Parse(format!("{}: {e}", path.display())))?;
    Ok(Array1::from_vec(values))
}

fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let text = fs::read_to_string(path)?;
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let row: std::result::Result<Vec<f64>, _> =
            line.split_whitespace().map(str::parse::<f64>).collect();
        rows.push(row.map_err(|e| Error::Parse(format!("{}: {e}", path.display())))?);
    }
    let ncols = rows.first().map(|r| r.len()).unwrap_or(0);
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(Error::Parse(format!("ragged matrix in {}", path.display())));
    }
    let nrows = rows.len();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), flat)
        .map_err(|e| Error::Parse(format!("{}: {e}", path.display())))
}

/// Cache key encoding the dataset-size selector and sparsity mode, matching
/// the filenames historical runs produced.
pub fn cache_key(num: Option<usize>, sparse: bool, num_hits: usize) -> String {
    let numstr = match num {
        Some(n) => n.to_string(),
        None => "all_nums".to_string(),
    };
    if sparse {
        format!("{numstr}_sm_nh_{num_hits}")
    } else {
        format!("{numstr}_sp")
    }
}

/// Directory-backed cache of real-population statistics.
#[derive(Debug, Clone)]
pub struct StatsCache {
    dir: PathBuf,
}

impl StatsCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn mu_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}_mu2.txt"))
    }

    fn sigma_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}_sigma2.txt"))
    }

    /// Load cached statistics; `None` when either file is missing or does
    /// not parse (both cases just mean "recompute").
    pub fn load(&self, key: &str) -> Option<PopulationStats> {
        let mu = read_vector(&self.mu_path(key)).ok()?;
        let sigma = read_matrix(&self.sigma_path(key)).ok()?;
        if sigma.nrows() != mu.len() || sigma.ncols() != mu.len() {
            debug!(key, "cached sigma shape disagrees with mu, recomputing");
            return None;
        }
        Some(PopulationStats { mu, sigma })
    }

    /// Persist statistics for a key.
    pub fn store(&self, key: &str, stats: &PopulationStats) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        write_vector(&self.mu_path(key), &stats.mu)?;
        write_matrix(&self.sigma_path(key), &stats.sigma)?;
        Ok(())
    }

    /// Return cached statistics when both files are present and valid,
    /// otherwise compute, persist, and return them.
    pub fn load_or_compute<F>(&self, key: &str, compute: F) -> Result<PopulationStats>
    where
        F: FnOnce() -> Result<PopulationStats>,
    {
        if let Some(stats) = self.load(key) {
            debug!(key, "using cached activation statistics");
            return Ok(stats);
        }
        let stats = compute()?;
        self.store(key, &stats)?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::features::ProjectionExtractor;
    use ndarray::Array3;

    fn test_data(n: usize) -> Array3<f64> {
        Array3::from_shape_fn((n, 10, 3), |(s, i, c)| {
            ((s * 17 + i * 5 + c) as f64 * 0.37).sin()
        })
    }

    #[test]
    fn chunked_stats_match_single_pass() {
        let ex = ProjectionExtractor::new(10, 3, 8, 1);
        let data = test_data(97);

        let all = ex.embed(&data).unwrap();
        let direct = stats_of(&all).unwrap();

        // Ragged final batch and final chunk on purpose.
        let chunked = population_stats(&ex, &data, 13, 3).unwrap();

        for (a, b) in direct.mu.iter().zip(chunked.mu.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
        for (a, b) in direct.sigma.iter().zip(chunked.sigma.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn covariance_needs_two_samples() {
        let one = Array2::<f64>::zeros((1, 4));
        assert!(activation_covariance(&one).is_err());
    }

    #[test]
    fn cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StatsCache::new(dir.path());
        let ex = ProjectionExtractor::new(10, 3, 6, 2);
        let stats = population_stats(&ex, &test_data(40), 8, 2).unwrap();

        let key = cache_key(Some(100), false, 10);
        cache.store(&key, &stats).unwrap();
        let loaded = cache.load(&key).unwrap();

        for (a, b) in stats.mu.iter().zip(loaded.mu.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        for (a, b) in stats.sigma.iter().zip(loaded.sigma.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn load_or_compute_short_circuits_on_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StatsCache::new(dir.path());
        let stats = PopulationStats {
            mu: Array1::from_vec(vec![1.0, 2.0]),
            sigma: Array2::eye(2),
        };
        cache.store("k", &stats).unwrap();

        let got = cache
            .load_or_compute("k", || panic!("cache hit must not recompute"))
            .unwrap();
        assert_eq!(got.mu.len(), 2);
    }

    #[test]
    fn missing_cache_triggers_compute() {
        let dir = tempfile::tempdir().unwrap();
        let cache = StatsCache::new(dir.path());
        let fresh = PopulationStats {
            mu: Array1::zeros(3),
            sigma: Array2::eye(3),
        };
        let out = cache.load_or_compute("absent", || Ok(fresh.clone())).unwrap();
        assert_eq!(out.mu.len(), 3);
        // Second call now hits the files written by the first.
        assert!(cache.load("absent").is_some());
    }

    #[test]
    fn cache_key_encodes_selector_and_sparsity() {
        assert_eq!(cache_key(Some(5), true, 30), "5_sm_nh_30");
        assert_eq!(cache_key(None, false, 30), "all_nums_sp");
    }
}
