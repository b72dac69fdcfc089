//! Inverted-file partitioning for approximate vector search
//!
//! Vectors are clustered with k-means; a query only scans rows assigned to
//! the partitions whose centroids are closest to it.

use super::DistanceMetric;
use serde::{Deserialize, Serialize};

const MAX_PARTITIONS: usize = 256;
const TRAIN_ITERATIONS: usize = 10;

/// Trained partition centroids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvfModel {
    pub metric: DistanceMetric,
    pub centroids: Vec<Vec<f32>>,
}

impl IvfModel {
    /// Train on `vectors`; `None` when there is nothing to train on
    pub fn train(vectors: &[Vec<f32>], metric: DistanceMetric) -> Option<Self> {
        if vectors.is_empty() {
            return None;
        }

        let points: Vec<Vec<f32>> = match metric {
            DistanceMetric::Cosine => vectors.iter().map(|v| normalized(v)).collect(),
            DistanceMetric::L2 => vectors.to_vec(),
        };
        let k = partition_count(points.len());
        let mut centroids = farthest_first(&points, k, metric);

        let dim = points[0].len();
        for _ in 0..TRAIN_ITERATIONS {
            let mut sums = vec![vec![0.0f32; dim]; k];
            let mut counts = vec![0usize; k];

            for point in &points {
                let p = nearest(&centroids, point, metric);
                counts[p] += 1;
                for (s, x) in sums[p].iter_mut().zip(point) {
                    *s += x;
                }
            }

            let mut moved = false;
            for (i, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
                // Empty partitions keep their previous centroid
                if count == 0 {
                    continue;
                }
                let mut mean: Vec<f32> = sum.into_iter().map(|s| s / count as f32).collect();
                if metric == DistanceMetric::Cosine {
                    mean = normalized(&mean);
                }
                if mean != centroids[i] {
                    centroids[i] = mean;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }

        Some(Self { metric, centroids })
    }

    pub fn partitions(&self) -> usize {
        self.centroids.len()
    }

    /// Partition a vector belongs to
    pub fn assign(&self, vector: &[f32]) -> usize {
        nearest(&self.centroids, vector, self.metric)
    }

    /// The `probes` partitions closest to `vector`, nearest first
    pub fn probe(&self, vector: &[f32], probes: usize) -> Vec<usize> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.metric.distance(c, vector)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        ranked.into_iter().take(probes.max(1)).map(|(i, _)| i).collect()
    }
}

fn partition_count(rows: usize) -> usize {
    ((rows as f64).sqrt().round() as usize).clamp(1, MAX_PARTITIONS)
}

/// Deterministic seeding: each new centroid is the point farthest from those chosen
fn farthest_first(points: &[Vec<f32>], k: usize, metric: DistanceMetric) -> Vec<Vec<f32>> {
    let mut centroids = vec![points[0].clone()];
    let mut closest: Vec<f32> = points
        .iter()
        .map(|p| metric.distance(&centroids[0], p))
        .collect();

    while centroids.len() < k {
        let Some((next, _)) = closest
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
        else {
            break;
        };
        let seed = points[next].clone();
        for (d, p) in closest.iter_mut().zip(points) {
            *d = d.min(metric.distance(&seed, p));
        }
        centroids.push(seed);
    }
    centroids
}

fn nearest(centroids: &[Vec<f32>], vector: &[f32], metric: DistanceMetric) -> usize {
    centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (i, metric.distance(c, vector)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn normalized(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        v.to_vec()
    } else {
        v.iter().map(|x| x / norm).collect()
    }
}
