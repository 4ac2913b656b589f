//! Seeded k-means (k-means++ init, Lloyd iterations) over contiguous storage.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::IndexError;
use crate::embedding::squared_l2;

const CONVERGENCE_SHIFT: f32 = 1e-6;

/// Train `k` centroids over `data` (`n × dims` floats, row-major).
///
/// Fails with [`IndexError::TooFewPoints`] when `k` is zero or exceeds the
/// number of points. An empty cluster keeps its previous centroid.
pub(crate) fn train(
    data: &[f32],
    dims: usize,
    k: usize,
    seed: u64,
    max_iterations: usize,
) -> Result<Vec<Vec<f32>>, IndexError> {
    let n = if dims == 0 { 0 } else { data.len() / dims };
    if k == 0 || k > n {
        return Err(IndexError::TooFewPoints {
            points: n,
            clusters: k,
        });
    }

    let points: Vec<&[f32]> = data.chunks_exact(dims).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = init_plus_plus(&points, k, &mut rng);

    for _ in 0..max_iterations {
        let mut sums = vec![vec![0.0f32; dims]; k];
        let mut counts = vec![0usize; k];

        for p in &points {
            let c = nearest(&centroids, p);
            counts[c] += 1;
            for (s, x) in sums[c].iter_mut().zip(p.iter()) {
                *s += x;
            }
        }

        let mut shift = 0.0f32;
        for (c, centroid) in centroids.iter_mut().enumerate() {
            if counts[c] == 0 {
                continue;
            }
            let inv = 1.0 / counts[c] as f32;
            let updated: Vec<f32> = sums[c].iter().map(|s| s * inv).collect();
            shift = shift.max(squared_l2(centroid, &updated));
            *centroid = updated;
        }

        if shift < CONVERGENCE_SHIFT {
            break;
        }
    }

    Ok(centroids)
}

/// Index of the centroid nearest to `point` (lowest index on ties).
pub(crate) fn nearest(centroids: &[Vec<f32>], point: &[f32]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_l2(c, point);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

fn init_plus_plus(points: &[&[f32]], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].to_vec());

    let mut dists: Vec<f32> = points
        .iter()
        .map(|p| squared_l2(p, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f32 = dists.iter().sum();
        let next = if total > 0.0 && total.is_finite() {
            let mut target = rng.gen::<f32>() * total;
            let mut chosen = points.len() - 1;
            for (i, d) in dists.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            // All remaining points coincide with a centroid.
            rng.gen_range(0..points.len())
        };

        let centroid = points[next].to_vec();
        for (d, p) in dists.iter_mut().zip(points.iter()) {
            *d = d.min(squared_l2(p, &centroid));
        }
        centroids.push(centroid);
    }

    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> Vec<f32> {
        let mut data = Vec::new();
        for i in 0..10 {
            let jitter = i as f32 * 0.01;
            data.extend_from_slice(&[1.0 + jitter, 0.0]);
            data.extend_from_slice(&[-1.0 - jitter, 0.0]);
        }
        data
    }

    #[test]
    fn test_separates_two_blobs() {
        let centroids = train(&two_blobs(), 2, 2, 7, 25).unwrap();
        assert_eq!(centroids.len(), 2);
        let a = nearest(&centroids, &[1.0, 0.0]);
        let b = nearest(&centroids, &[-1.0, 0.0]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let data = two_blobs();
        assert_eq!(
            train(&data, 2, 3, 11, 25).unwrap(),
            train(&data, 2, 3, 11, 25).unwrap()
        );
    }

    #[test]
    fn test_rejects_more_clusters_than_points() {
        let err = train(&[1.0, 0.0, 0.0, 1.0], 2, 3, 1, 10).unwrap_err();
        assert_eq!(
            err,
            IndexError::TooFewPoints {
                points: 2,
                clusters: 3
            }
        );
        assert!(train(&[1.0, 0.0], 2, 0, 1, 10).is_err());
    }
}
