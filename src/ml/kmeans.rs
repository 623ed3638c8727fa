// ============================================================
// Layer 5 — K-Means Clustering
// ============================================================
// Two interchangeable clustering algorithms turn a pool of
// latent vectors into exactly k centroids:
//
//   minibatch — Sculley (2010) mini-batch k-means on the host.
//               Each iteration samples `batch_size` vectors,
//               assigns them to the current centroids, and
//               moves each centroid toward its points with a
//               per-centroid learning rate 1 / count.
//
//   tensor    — Lloyd iterations on the training device over a
//               random minibatch of up to 100 000 vectors.
//               Distances are computed in row chunks so the
//               [rows, k] matrix stays bounded.
//
// Both start from k-means++ seeding over a bounded sample and
// leave a centroid where it is if no vector is assigned to it,
// so the output always has exactly k rows.
//
// Reference: Arthur & Vassilvitskii (2007) k-means++
//            Sculley (2010) Web-scale k-means clustering

use burn::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{fmt, str::FromStr};

use crate::domain::error::TrainError;

/// Rows per distance block in the tensor variant.
const ASSIGN_CHUNK: usize = 4096;

// ─── Feature Pool ─────────────────────────────────────────────────────────────

/// Row-major collection of equally wide feature vectors on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturePool {
    dim:  usize,
    data: Vec<f32>,
}

impl FeaturePool {
    pub fn new(dim: usize) -> Self {
        Self { dim, data: Vec::new() }
    }

    /// Append a flat block of whole rows.
    pub fn extend(&mut self, rows: &[f32]) {
        debug_assert_eq!(rows.len() % self.dim, 0);
        self.data.extend_from_slice(rows);
    }

    pub fn len(&self) -> usize { self.data.len() / self.dim }

    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub fn dim(&self) -> usize { self.dim }

    pub fn row(&self, index: usize) -> &[f32] {
        &self.data[index * self.dim..(index + 1) * self.dim]
    }

    pub fn as_slice(&self) -> &[f32] { &self.data }
}

// ─── Algorithm selection ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAlgorithm {
    MiniBatch,
    Tensor,
}

impl ClusterAlgorithm {
    pub const NAMES: [&'static str; 2] = ["minibatch", "tensor"];

    pub fn name(&self) -> &'static str {
        match self {
            ClusterAlgorithm::MiniBatch => "minibatch",
            ClusterAlgorithm::Tensor    => "tensor",
        }
    }
}

impl FromStr for ClusterAlgorithm {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minibatch" => Ok(ClusterAlgorithm::MiniBatch),
            "tensor"    => Ok(ClusterAlgorithm::Tensor),
            other => Err(TrainError::UnsupportedClusterAlgorithm {
                name:      other.to_string(),
                supported: Self::NAMES.join(", "),
            }),
        }
    }
}

impl fmt::Display for ClusterAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct KMeansSettings {
    /// Number of centroids
    pub k:          usize,
    pub max_iters:  usize,
    /// Vectors sampled per iteration
    pub batch_size: usize,
    pub seed:       u64,
}

impl KMeansSettings {
    pub fn for_algorithm(algorithm: ClusterAlgorithm, k: usize, max_iters: usize, pool_len: usize) -> Self {
        let batch_size = match algorithm {
            ClusterAlgorithm::MiniBatch => 10_000,
            ClusterAlgorithm::Tensor    => pool_len.min(100_000),
        };
        Self { k, max_iters, batch_size, seed: 42 }
    }
}

// ─── Host helpers ─────────────────────────────────────────────────────────────

fn sq_dist(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f32], centers: &[f32], dim: usize) -> usize {
    centers
        .chunks_exact(dim)
        .enumerate()
        .map(|(i, c)| (i, sq_dist(point, c)))
        .fold((0, f32::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
        .0
}

/// k-means++ seeding over at most `max(3k, 1000)` sampled vectors.
///
/// Once every sampled vector coincides with a chosen centroid the
/// remaining seeds are drawn uniformly, which repeats vectors but
/// keeps the centroid count at k.
fn kmeans_plus_plus(pool: &FeaturePool, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let n    = pool.len();
    let dim  = pool.dim();
    let cap  = (3 * k).max(1000).min(n);
    let sample: Vec<usize> = if cap < n {
        rand::seq::index::sample(rng, n, cap).into_vec()
    } else {
        (0..n).collect()
    };

    let mut centers = Vec::with_capacity(k * dim);
    centers.extend_from_slice(pool.row(sample[rng.gen_range(0..sample.len())]));
    let mut d2: Vec<f32> = sample.iter().map(|&i| sq_dist(pool.row(i), &centers[..dim])).collect();

    while centers.len() < k * dim {
        let total: f64 = d2.iter().map(|&d| f64::from(d)).sum();
        let pick = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc    = 0.0;
            let mut chosen = d2.iter().rposition(|&d| d > 0.0).unwrap_or(0);
            for (j, &d) in d2.iter().enumerate() {
                if d <= 0.0 {
                    continue;
                }
                acc += f64::from(d);
                if acc > target {
                    chosen = j;
                    break;
                }
            }
            chosen
        } else {
            rng.gen_range(0..sample.len())
        };

        let start = centers.len();
        centers.extend_from_slice(pool.row(sample[pick]));
        let newest = &centers[start..start + dim];
        for (j, &i) in sample.iter().enumerate() {
            d2[j] = d2[j].min(sq_dist(pool.row(i), newest));
        }
    }
    centers
}

// ─── Mini-batch (host) ────────────────────────────────────────────────────────

/// Returns `k * dim` centroid values, row-major.
pub fn minibatch_kmeans(pool: &FeaturePool, settings: &KMeansSettings) -> Vec<f32> {
    let n   = pool.len();
    let dim = pool.dim();
    let mut rng     = StdRng::seed_from_u64(settings.seed);
    let mut centers = kmeans_plus_plus(pool, settings.k, &mut rng);
    let mut counts  = vec![0u64; settings.k];
    let batch_size  = settings.batch_size.min(n);

    for iter in 0..settings.max_iters {
        let batch: Vec<usize> = rand::seq::index::sample(&mut rng, n, batch_size).into_vec();
        let assigned: Vec<usize> = batch
            .iter()
            .map(|&i| nearest(pool.row(i), &centers, dim))
            .collect();

        for (&i, &c) in batch.iter().zip(&assigned) {
            counts[c] += 1;
            let eta    = 1.0 / counts[c] as f32;
            let center = &mut centers[c * dim..(c + 1) * dim];
            for (cv, &xv) in center.iter_mut().zip(pool.row(i)) {
                *cv = (1.0 - eta) * *cv + eta * xv;
            }
        }
        tracing::debug!("mini-batch k-means iteration {}/{}", iter + 1, settings.max_iters);
    }
    centers
}

// ─── Lloyd (device) ───────────────────────────────────────────────────────────

/// Index of the nearest centroid for every row of `x`.
///
/// x: [n, dim], centroids: [k, dim] → [n]
pub fn nearest_centroids<B: Backend>(x: Tensor<B, 2>, centroids: Tensor<B, 2>) -> Tensor<B, 1, Int> {
    // ||x - c||² = ||x||² - 2 x·c + ||c||²
    let x_sq = x.clone().powf_scalar(2.0).sum_dim(1);
    let c_sq = centroids.clone().powf_scalar(2.0).sum_dim(1).transpose();
    let distances = x_sq - x.matmul(centroids.transpose()).mul_scalar(2.0) + c_sq;
    distances.argmin(1).flatten::<1>(0, 1)
}

pub fn tensor_kmeans<B: Backend>(
    pool:     &FeaturePool,
    settings: &KMeansSettings,
    device:   &B::Device,
) -> Tensor<B, 2> {
    let n   = pool.len();
    let dim = pool.dim();
    let k   = settings.k;
    let mut rng = StdRng::seed_from_u64(settings.seed);

    let points = Tensor::<B, 2>::from_data(TensorData::new(pool.as_slice().to_vec(), [n, dim]), device);
    let mut centers = Tensor::<B, 2>::from_data(
        TensorData::new(kmeans_plus_plus(pool, k, &mut rng), [k, dim]),
        device,
    );
    let code_ids = Tensor::<B, 1, Int>::arange(0..k as i64, device).reshape([1, k]);

    for iter in 0..settings.max_iters {
        let batch = if settings.batch_size < n {
            let picked: Vec<i32> = rand::seq::index::sample(&mut rng, n, settings.batch_size)
                .into_iter()
                .map(|i| i as i32)
                .collect();
            points.clone().select(0, Tensor::<B, 1, Int>::from_ints(picked.as_slice(), device))
        } else {
            points.clone()
        };
        let m = batch.dims()[0];

        let mut sums   = Tensor::<B, 2>::zeros([k, dim], device);
        let mut counts = Tensor::<B, 2>::zeros([k, 1], device);
        for start in (0..m).step_by(ASSIGN_CHUNK) {
            let end  = (start + ASSIGN_CHUNK).min(m);
            let rows = end - start;
            let x    = batch.clone().slice([start..end, 0..dim]);

            let assigned = nearest_centroids(x.clone(), centers.clone());
            let one_hot  = assigned
                .reshape([rows, 1])
                .expand([rows, k])
                .equal(code_ids.clone().expand([rows, k]))
                .float();

            sums   = sums + one_hot.clone().transpose().matmul(x);
            counts = counts + one_hot.sum_dim(0).transpose();
        }

        let empty   = counts.clone().equal_elem(0.0).expand([k, dim]);
        let updated = (sums / counts.clamp_min(1.0)).mask_where(empty, centers.clone());
        let shift   = (updated.clone() - centers).powf_scalar(2.0).sum().into_scalar().elem::<f64>();
        centers = updated;

        tracing::debug!("tensor k-means iteration {}/{} shift={:.6}", iter + 1, settings.max_iters, shift);
        if shift < 1e-12 {
            break;
        }
    }
    centers
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    /// Four well-separated points, each repeated `copies` times.
    fn separated_pool(copies: usize) -> (FeaturePool, Vec<[f32; 2]>) {
        let points = vec![[10.0, 0.0], [0.0, 10.0], [-10.0, 0.0], [0.0, -10.0]];
        let mut pool = FeaturePool::new(2);
        for i in 0..copies * points.len() {
            pool.extend(&points[i % points.len()]);
        }
        (pool, points)
    }

    /// Every centroid's nearest input point, as indices.
    fn nearest_inputs(centroids: &[f32], points: &[[f32; 2]]) -> Vec<usize> {
        let flat: Vec<f32> = points.iter().flatten().copied().collect();
        centroids.chunks_exact(2).map(|c| nearest(c, &flat, 2)).collect()
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let err = "faiss".parse::<ClusterAlgorithm>().unwrap_err();
        assert!(matches!(err, TrainError::UnsupportedClusterAlgorithm { .. }));
        assert_eq!("tensor".parse::<ClusterAlgorithm>(), Ok(ClusterAlgorithm::Tensor));
        assert_eq!("minibatch".parse::<ClusterAlgorithm>(), Ok(ClusterAlgorithm::MiniBatch));
    }

    #[test]
    fn test_minibatch_recovers_separated_clusters() {
        let (pool, points) = separated_pool(50);
        let settings  = KMeansSettings::for_algorithm(ClusterAlgorithm::MiniBatch, 4, 10, pool.len());
        let centroids = minibatch_kmeans(&pool, &settings);

        assert_eq!(centroids.len(), 4 * 2);
        let mut owners = nearest_inputs(&centroids, &points);
        owners.sort();
        assert_eq!(owners, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_tensor_recovers_separated_clusters() {
        let (pool, points) = separated_pool(50);
        let settings  = KMeansSettings::for_algorithm(ClusterAlgorithm::Tensor, 4, 10, pool.len());
        let centroids = tensor_kmeans::<NdArray>(&pool, &settings, &Default::default());

        assert_eq!(centroids.dims(), [4, 2]);
        let values: Vec<f32> = centroids.into_data().convert::<f32>().to_vec::<f32>().unwrap();
        let mut owners = nearest_inputs(&values, &points);
        owners.sort();
        assert_eq!(owners, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_more_centroids_than_distinct_points() {
        // Only 4 distinct vectors but 6 centroids: cardinality still holds
        let (pool, _) = separated_pool(10);
        let settings  = KMeansSettings::for_algorithm(ClusterAlgorithm::MiniBatch, 6, 3, pool.len());
        assert_eq!(minibatch_kmeans(&pool, &settings).len(), 6 * 2);
    }

    #[test]
    fn test_nearest_centroids_on_device() {
        let device    = Default::default();
        let x         = Tensor::<NdArray, 2>::from_data(TensorData::new(vec![9.0f32, 0.0, 0.0, -9.0], [2, 2]), &device);
        let centroids = Tensor::<NdArray, 2>::from_data(TensorData::new(vec![0.0f32, -10.0, 10.0, 0.0], [2, 2]), &device);
        let idx: Vec<i64> = nearest_centroids(x, centroids).into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(idx, vec![1, 0]);
    }
}
