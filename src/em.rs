//! EM distance learner: alternate pairwise optimal transport over recipes
//! (E-step) with a refit of the ingredient cost matrix from the transport
//! plans (M-step).
//!
//! The loop runs for a fixed iteration budget; given the per-pair transport
//! cost this is a deliberately capped batch job, and exhausting the budget is
//! the normal terminal state, not an error. Pair solves are embarrassingly
//! parallel: every solve reads the same immutable cost matrix and produces
//! its own cells of the distance matrix, so the E-step fans out on a rayon
//! pool and the M-step is a single sequential aggregation between sweeps.
//!
//! The refit treats the accumulated transport mass like co-occurrence counts
//! over a categorical alphabet: pairs of ingredients that plans frequently
//! move mass between get a high log-odds similarity, which turns into a low
//! learned cost (`cost = (sim_gg + sim_hh)/2 - sim_gh`, clamped at zero).
//! Each refit replaces the cost matrix wholesale; an iteration that
//! accumulated no mass keeps the previous matrix.

use crate::transport::solve_pair;
use crate::volume::VolumeMatrix;
use crate::{Config, Error, Result};
use log::{debug, info, warn};
use ndarray::Array2;
use rayon::prelude::*;
use serde::Serialize;

/// Pseudocount keeping unseen ingredient pairs finite in the refit.
const REFIT_SMOOTHING: f64 = 1e-6;

/// Result of one EM run.
#[derive(Debug, Clone)]
pub struct EmOutcome {
    /// Symmetric, zero-diagonal recipe × recipe distance matrix from the
    /// final E-step.
    pub distances: Array2<f32>,
    /// Learned ingredient cost matrix from the final M-step.
    pub cost: Array2<f32>,
    pub diagnostics: EmDiagnostics,
}

/// Per-iteration counters for the orchestrating job's logs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationStats {
    pub pairs_solved: usize,
    pub pairs_skipped: usize,
    pub pairs_defaulted: usize,
    pub mean_distance: f32,
    /// Max absolute cost-matrix change versus the previous iteration.
    /// Diagnostic only; nothing early-stops on it.
    pub cost_delta: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmDiagnostics {
    pub iterations: Vec<IterationStats>,
}

/// Pairs solved in parallel per batch; accumulation stays in pair order so
/// runs are bit-for-bit reproducible regardless of thread count.
const PAIR_CHUNK: usize = 4096;

/// E-step output, accumulated sequentially from the parallel pair solves.
struct Accum {
    /// Transported mass per (global ingredient, global ingredient) cell.
    mass: Array2<f32>,
    /// `(i, j, distance)` for the upper triangle.
    distances: Vec<(usize, usize, f32)>,
    solved: usize,
    skipped: usize,
    defaulted: usize,
    distance_sum: f64,
}

/// Result of one pair solve, before accumulation.
enum PairOutput {
    Solved {
        distance: f32,
        /// Transported mass on global ingredient cells.
        mass: Vec<(usize, usize, f32)>,
    },
    Skipped,
    Defaulted,
}

/// Run the EM loop and return the learned matrices plus diagnostics.
///
/// `initial_cost` must be the square ground-cost matrix over the volume
/// matrix's ingredient space. Per-pair solver failures are logged and fall
/// back to a neutral default distance; they never abort the run.
pub fn learn_distances(
    volumes: &VolumeMatrix,
    initial_cost: &Array2<f32>,
    cfg: &Config,
) -> Result<EmOutcome> {
    let n = volumes.n_ingredients();
    if initial_cost.nrows() != n || initial_cost.ncols() != n {
        return Err(Error::ShapeMismatch(
            n,
            n,
            initial_cost.nrows(),
            initial_cost.ncols(),
        ));
    }

    let m = volumes.n_recipes();
    let pairs: Vec<(usize, usize)> = (0..m)
        .flat_map(|i| ((i + 1)..m).map(move |j| (i, j)))
        .collect();
    info!(
        "EM over {m} recipes ({} pairs), {} ingredient columns, {} iterations",
        pairs.len(),
        n,
        cfg.em_iterations
    );

    let pool = build_pool(cfg.workers);
    let mut cost = initial_cost.clone();
    let mut distances = Array2::<f32>::zeros((m, m));
    let mut diagnostics = EmDiagnostics::default();

    for iteration in 0..cfg.em_iterations {
        let accum = match &pool {
            Some(pool) => pool.install(|| e_step(volumes, &cost, &pairs, cfg)),
            None => e_step(volumes, &cost, &pairs, cfg),
        };

        distances = Array2::zeros((m, m));
        for &(i, j, d) in &accum.distances {
            distances[[i, j]] = d;
            distances[[j, i]] = d;
        }

        let previous = cost;
        cost = match refit_cost(&accum.mass) {
            Some(refit) => refit,
            None => {
                // No mass moved anywhere; keep the matrix from the last
                // iteration and let the diagnostics show a zero delta.
                warn!("M-step accumulated no transport mass; retaining previous cost matrix");
                previous.clone()
            }
        };
        debug_assert!(cost_matrix_is_valid(&cost));

        let cost_delta = previous
            .iter()
            .zip(cost.iter())
            .map(|(&p, &c)| (p - c).abs())
            .fold(0.0f32, f32::max);
        let mean_distance = if accum.solved > 0 {
            (accum.distance_sum / accum.solved as f64) as f32
        } else {
            0.0
        };
        debug!(
            "EM iteration {iteration}: solved={} skipped={} defaulted={} mean_distance={mean_distance:.4} cost_delta={cost_delta:.4}",
            accum.solved, accum.skipped, accum.defaulted
        );
        diagnostics.iterations.push(IterationStats {
            pairs_solved: accum.solved,
            pairs_skipped: accum.skipped,
            pairs_defaulted: accum.defaulted,
            mean_distance,
            cost_delta,
        });
    }

    Ok(EmOutcome {
        distances,
        cost,
        diagnostics,
    })
}

fn build_pool(workers: usize) -> Option<rayon::ThreadPool> {
    if workers == 0 {
        return None;
    }
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!("could not build {workers}-thread pool ({err}); using the global pool");
            None
        }
    }
}

/// Solve every recipe pair against the current cost matrix.
///
/// Pair solves fan out on the rayon pool in fixed-size chunks; each chunk's
/// results are then folded into the accumulator in pair order.
fn e_step(
    volumes: &VolumeMatrix,
    cost: &Array2<f32>,
    pairs: &[(usize, usize)],
    cfg: &Config,
) -> Accum {
    let n = volumes.n_ingredients();
    let neutral = mean_off_diagonal(cost);
    let mut acc = Accum {
        mass: Array2::zeros((n, n)),
        distances: Vec::with_capacity(pairs.len()),
        solved: 0,
        skipped: 0,
        defaulted: 0,
        distance_sum: 0.0,
    };

    for chunk in pairs.chunks(PAIR_CHUNK) {
        let outputs: Vec<PairOutput> = chunk
            .par_iter()
            .map(|&(i, j)| solve_one(volumes, cost, i, j, cfg))
            .collect();

        for (&(i, j), output) in chunk.iter().zip(outputs) {
            match output {
                PairOutput::Solved { distance, mass } => {
                    acc.distances.push((i, j, distance));
                    acc.distance_sum += distance as f64;
                    acc.solved += 1;
                    for (g, h, p) in mass {
                        acc.mass[[g, h]] += p;
                    }
                }
                PairOutput::Skipped => {
                    acc.distances.push((i, j, neutral));
                    acc.skipped += 1;
                }
                PairOutput::Defaulted => {
                    acc.distances.push((i, j, neutral));
                    acc.defaulted += 1;
                }
            }
        }
    }
    acc
}

/// Solve one recipe pair on the union of their supports.
fn solve_one(
    volumes: &VolumeMatrix,
    cost: &Array2<f32>,
    i: usize,
    j: usize,
    cfg: &Config,
) -> PairOutput {
    let row_i = volumes.row(i);
    let row_j = volumes.row(j);
    if row_i.is_empty() || row_j.is_empty() {
        return PairOutput::Skipped;
    }

    // Restrict both distributions to the union of their supports and slice
    // the matching cost sub-block.
    let columns = support_union(row_i, row_j);
    let a = volumes.row_on(i, &columns);
    let b = volumes.row_on(j, &columns);
    let k = columns.len();
    let mut sub_cost = Array2::<f32>::zeros((k, k));
    for (p, &gp) in columns.iter().enumerate() {
        for (q, &gq) in columns.iter().enumerate() {
            sub_cost[[p, q]] = cost[[gp, gq]];
        }
    }

    match solve_pair(&a, &b, &sub_cost, cfg.transport_reg, cfg.transport_iters) {
        Ok((plan, distance)) => {
            let mut mass = Vec::with_capacity(k * k);
            for (p, &gp) in columns.iter().enumerate() {
                for (q, &gq) in columns.iter().enumerate() {
                    let pij = plan[[p, q]];
                    if pij > 0.0 {
                        mass.push((gp, gq, pij));
                    }
                }
            }
            PairOutput::Solved { distance, mass }
        }
        Err(err) => {
            warn!("pair ({i}, {j}) transport failed ({err}); defaulting");
            PairOutput::Defaulted
        }
    }
}

/// Sorted union of two sparse supports.
fn support_union(a: &[(usize, f32)], b: &[(usize, f32)]) -> Vec<usize> {
    let mut columns: Vec<usize> = a.iter().chain(b).map(|&(c, _)| c).collect();
    columns.sort_unstable();
    columns.dedup();
    columns
}

/// Refit the cost matrix from accumulated transport mass.
///
/// Returns `None` when no mass was accumulated at all, in which case the
/// caller retains the previous matrix.
fn refit_cost(mass: &Array2<f32>) -> Option<Array2<f32>> {
    let n = mass.nrows();
    // Symmetrize without changing the diagonal scale. Matrix storage stays
    // f32; only the scalar accumulators widen.
    let mut s = Array2::<f32>::zeros((n, n));
    for g in 0..n {
        for h in 0..n {
            s[[g, h]] = 0.5 * (mass[[g, h]] + mass[[h, g]]);
        }
    }
    let total: f64 = s.iter().map(|&x| x as f64).sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }

    let marginals: Vec<f64> = (0..n)
        .map(|g| s.row(g).iter().map(|&x| x as f64).sum::<f64>() / total)
        .collect();
    let sim = |g: usize, h: usize| -> f64 {
        let joint = s[[g, h]] as f64 / total;
        ((joint + REFIT_SMOOTHING) / (marginals[g] * marginals[h] + REFIT_SMOOTHING)).ln()
    };

    let mut cost = Array2::<f32>::zeros((n, n));
    for g in 0..n {
        for h in (g + 1)..n {
            let c = (0.5 * (sim(g, g) + sim(h, h)) - sim(g, h)).max(0.0) as f32;
            cost[[g, h]] = c;
            cost[[h, g]] = c;
        }
    }
    Some(cost)
}

fn mean_off_diagonal(cost: &Array2<f32>) -> f32 {
    let n = cost.nrows();
    if n < 2 {
        return 0.0;
    }
    let total: f64 = cost.iter().map(|&c| c as f64).sum::<f64>();
    (total / (n * (n - 1)) as f64) as f32
}

fn cost_matrix_is_valid(cost: &Array2<f32>) -> bool {
    let n = cost.nrows();
    (0..n).all(|g| {
        cost[[g, g]] == 0.0 && (0..n).all(|h| cost[[g, h]] >= 0.0 && cost[[g, h]] == cost[[h, g]])
    })
}
