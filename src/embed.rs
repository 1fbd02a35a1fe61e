//! 2D embedding of the learned recipe distance matrix.
//!
//! The distance matrix is treated as a precomputed metric: build a k-nearest
//! neighborhood graph with locally scaled membership weights, then lay the
//! points out with stochastic gradient descent over attractive edge forces
//! and sampled repulsion. Seeded RNG, single-threaded layout: the same seed
//! always produces the same coordinates.

use crate::{Config, Error, Result};
use log::debug;
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Minimum points the layout is defined for; callers short-circuit below it.
pub const MIN_POINTS: usize = 3;

const NEGATIVE_SAMPLES: usize = 5;
const GRADIENT_CLIP: f32 = 4.0;

/// Embed an `m × m` distance matrix into `m × 2` coordinates.
///
/// Row `i` of the output corresponds to row `i` of the input, which the
/// caller maps back to recipe ids through the recipe registry.
pub fn embed(distances: &Array2<f32>, cfg: &Config) -> Result<Array2<f32>> {
    let m = distances.nrows();
    if distances.ncols() != m {
        return Err(Error::ShapeMismatch(m, m, distances.nrows(), distances.ncols()));
    }
    if m < MIN_POINTS {
        return Err(Error::DegenerateEmbedding(m));
    }

    let k = cfg.embed_neighbors.min(m - 1);
    let edges = neighborhood_graph(distances, k);
    let (a, b) = fit_curve(cfg.embed_min_dist);
    debug!(
        "embedding {m} points: {} edges, k={k}, curve a={a:.3} b={b:.3}",
        edges.len()
    );

    let mut rng = ChaCha8Rng::seed_from_u64(cfg.embed_seed);
    let mut coords = Array2::<f32>::zeros((m, 2));
    for i in 0..m {
        coords[[i, 0]] = rng.gen_range(-10.0..10.0);
        coords[[i, 1]] = rng.gen_range(-10.0..10.0);
    }

    let epochs = cfg.embed_epochs.max(1);
    for epoch in 0..epochs {
        let alpha = 1.0 - epoch as f32 / epochs as f32;
        for &(i, j, w) in &edges {
            // Stronger edges pull more often.
            if rng.gen::<f32>() >= w {
                continue;
            }
            attract(&mut coords, i, j, a, b, alpha);
            for _ in 0..NEGATIVE_SAMPLES {
                let other = rng.gen_range(0..m);
                if other != i && other != j {
                    repel(&mut coords, i, other, a, b, alpha);
                }
            }
        }
    }

    Ok(coords)
}

/// k-nearest neighborhood edges with symmetrized membership weights.
///
/// Local scaling follows the smooth-kNN construction: per point, `rho` is
/// the nearest-neighbor distance and `sigma` is solved so the neighborhood
/// carries `log2(k)` total membership. Directed weights are fuzzy-union
/// symmetrized (`w + w' - w·w'`).
fn neighborhood_graph(distances: &Array2<f32>, k: usize) -> Vec<(usize, usize, f32)> {
    let m = distances.nrows();
    let mut directed = vec![0.0f32; m * m];

    for i in 0..m {
        let mut neighbors: Vec<(usize, f32)> = (0..m)
            .filter(|&j| j != i)
            .map(|j| (j, distances[[i, j]]))
            .collect();
        neighbors.sort_unstable_by(|x, y| x.1.total_cmp(&y.1));
        neighbors.truncate(k);

        let rho = neighbors
            .iter()
            .map(|&(_, d)| d)
            .find(|&d| d > 0.0)
            .unwrap_or(0.0);
        let sigma = solve_sigma(&neighbors, rho, (k as f32).log2().max(1.0));
        for &(j, d) in &neighbors {
            let w = (-((d - rho).max(0.0)) / sigma).exp();
            directed[i * m + j] = w;
        }
    }

    let mut edges = Vec::new();
    for i in 0..m {
        for j in (i + 1)..m {
            let w_ij = directed[i * m + j];
            let w_ji = directed[j * m + i];
            let w = w_ij + w_ji - w_ij * w_ji;
            if w > 0.0 {
                edges.push((i, j, w.min(1.0)));
            }
        }
    }
    edges
}

/// Binary search for the bandwidth putting `target` total membership on the
/// neighborhood.
fn solve_sigma(neighbors: &[(usize, f32)], rho: f32, target: f32) -> f32 {
    let mut lo = 1e-4f32;
    let mut hi = 1e4f32;
    let mut sigma = 1.0f32;
    for _ in 0..64 {
        sigma = 0.5 * (lo + hi);
        let total: f32 = neighbors
            .iter()
            .map(|&(_, d)| (-((d - rho).max(0.0)) / sigma).exp())
            .sum();
        if (total - target).abs() < 1e-5 {
            break;
        }
        if total > target {
            hi = sigma;
        } else {
            lo = sigma;
        }
    }
    sigma
}

/// Fit the curve `phi(d) = 1 / (1 + a d^(2b))` to the piecewise target
/// (flat inside `min_dist`, exponential falloff outside) by coarse-to-fine
/// grid search. Deterministic, no RNG involved.
fn fit_curve(min_dist: f32) -> (f32, f32) {
    let samples: Vec<f32> = (1..=300).map(|i| i as f32 * 0.01).collect();
    let target = |d: f32| -> f32 {
        if d <= min_dist {
            1.0
        } else {
            (-(d - min_dist)).exp()
        }
    };

    let mut best = (1.0f32, 1.0f32);
    let mut best_err = f32::INFINITY;
    let search = |a_lo: f32, a_hi: f32, b_lo: f32, b_hi: f32, steps: usize, best: &mut (f32, f32), best_err: &mut f32| {
        for ai in 0..=steps {
            let a = a_lo + (a_hi - a_lo) * ai as f32 / steps as f32;
            for bi in 0..=steps {
                let b = b_lo + (b_hi - b_lo) * bi as f32 / steps as f32;
                let err: f32 = samples
                    .iter()
                    .map(|&d| {
                        let phi = 1.0 / (1.0 + a * d.powf(2.0 * b));
                        let t = target(d);
                        (phi - t) * (phi - t)
                    })
                    .sum();
                if err < *best_err {
                    *best_err = err;
                    *best = (a, b);
                }
            }
        }
    };

    search(0.05, 4.0, 0.3, 2.0, 40, &mut best, &mut best_err);
    let (a0, b0) = best;
    search(
        (a0 - 0.2).max(0.01),
        a0 + 0.2,
        (b0 - 0.1).max(0.1),
        b0 + 0.1,
        40,
        &mut best,
        &mut best_err,
    );
    best
}

fn attract(coords: &mut Array2<f32>, i: usize, j: usize, a: f32, b: f32, alpha: f32) {
    let dx = coords[[i, 0]] - coords[[j, 0]];
    let dy = coords[[i, 1]] - coords[[j, 1]];
    let d2 = dx * dx + dy * dy;
    if d2 <= 0.0 {
        return;
    }
    let coef = (-2.0 * a * b * d2.powf(b - 1.0)) / (1.0 + a * d2.powf(b));
    let gx = (coef * dx).clamp(-GRADIENT_CLIP, GRADIENT_CLIP) * alpha;
    let gy = (coef * dy).clamp(-GRADIENT_CLIP, GRADIENT_CLIP) * alpha;
    coords[[i, 0]] += gx;
    coords[[i, 1]] += gy;
    coords[[j, 0]] -= gx;
    coords[[j, 1]] -= gy;
}

fn repel(coords: &mut Array2<f32>, i: usize, other: usize, a: f32, b: f32, alpha: f32) {
    let dx = coords[[i, 0]] - coords[[other, 0]];
    let dy = coords[[i, 1]] - coords[[other, 1]];
    let d2 = dx * dx + dy * dy;
    let coef = (2.0 * b) / ((0.001 + d2) * (1.0 + a * d2.powf(b)));
    let gx = (coef * dx).clamp(-GRADIENT_CLIP, GRADIENT_CLIP) * alpha;
    let gy = (coef * dy).clamp(-GRADIENT_CLIP, GRADIENT_CLIP) * alpha;
    coords[[i, 0]] += gx;
    coords[[i, 1]] += gy;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight clusters far apart.
    fn cluster_distances() -> Array2<f32> {
        let m = 6;
        let mut d = Array2::<f32>::zeros((m, m));
        for i in 0..m {
            for j in 0..m {
                if i == j {
                    continue;
                }
                let same = (i < 3) == (j < 3);
                d[[i, j]] = if same { 0.1 } else { 10.0 };
            }
        }
        d
    }

    fn cfg() -> Config {
        Config {
            embed_neighbors: 3,
            embed_epochs: 300,
            ..Config::default()
        }
    }

    #[test]
    fn output_has_one_row_per_input_point() {
        let coords = embed(&cluster_distances(), &cfg()).unwrap();
        assert_eq!(coords.shape(), &[6, 2]);
        assert!(coords.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn same_seed_same_coordinates() {
        let a = embed(&cluster_distances(), &cfg()).unwrap();
        let b = embed(&cluster_distances(), &cfg()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seed_different_coordinates() {
        let a = embed(&cluster_distances(), &cfg()).unwrap();
        let other = Config {
            embed_seed: 7,
            ..cfg()
        };
        let b = embed(&cluster_distances(), &other).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn clusters_stay_closer_than_strangers() {
        let coords = embed(&cluster_distances(), &cfg()).unwrap();
        let dist = |i: usize, j: usize| {
            let dx = coords[[i, 0]] - coords[[j, 0]];
            let dy = coords[[i, 1]] - coords[[j, 1]];
            (dx * dx + dy * dy).sqrt()
        };
        let intra = (dist(0, 1) + dist(1, 2) + dist(3, 4) + dist(4, 5)) / 4.0;
        let inter = (dist(0, 3) + dist(1, 4) + dist(2, 5)) / 3.0;
        assert!(
            intra < inter,
            "cluster members should embed closer (intra={intra}, inter={inter})"
        );
    }

    #[test]
    fn too_few_points_is_reported() {
        let d = Array2::<f32>::zeros((2, 2));
        assert!(matches!(
            embed(&d, &Config::default()),
            Err(Error::DegenerateEmbedding(2))
        ));
    }

    #[test]
    fn curve_fit_tracks_min_dist() {
        // Larger min_dist flattens the curve: smaller a.
        let (a_tight, _) = fit_curve(0.01);
        let (a_loose, _) = fit_curve(0.8);
        assert!(a_loose < a_tight, "a should shrink as min_dist grows");
    }
}
