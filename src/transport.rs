//! Per-pair entropic optimal transport in log-space.
//!
//! This is the E-step kernel: given two recipe distributions restricted to a
//! shared ingredient support and the cost sub-block between those
//! ingredients, solve the regularized transport problem
//!
//! ```text
//! min_P <C, P> - ε H(P)    s.t.  P1 = a, P^T1 = b, P ≥ 0
//! ```
//!
//! and return the plan together with the transport distance `<C, P>`.
//!
//! All computation is in the log domain with the log-sum-exp trick, so small
//! regularization does not underflow f32. Zero-mass bins are treated as hard
//! support exclusions (`log 0 = -∞`), which keeps plan entries for absent
//! ingredients at exactly zero.

use crate::{Error, Result, EPSILON};
use ndarray::{Array1, Array2};

/// Numerically stable `log Σ exp(x_i)` over an indexable family.
///
/// Returns `-∞` for an empty family and propagates a non-finite max.
#[inline]
fn logsumexp_by(len: usize, mut f: impl FnMut(usize) -> f32) -> f32 {
    if len == 0 {
        return f32::NEG_INFINITY;
    }

    let mut max_val = f32::NEG_INFINITY;
    for i in 0..len {
        max_val = max_val.max(f(i));
    }
    if !max_val.is_finite() {
        return max_val;
    }

    let mut sum_exp = 0.0;
    for i in 0..len {
        sum_exp += (f(i) - max_val).exp();
    }
    max_val + sum_exp.ln()
}

/// Solve balanced entropic OT for one pair of distributions.
///
/// Runs a fixed number of log-domain Sinkhorn sweeps; the iteration budget is
/// part of the contract here, there is no convergence error path. Returns
/// `(plan, distance)` where `distance = <C, P>`.
///
/// # Errors
///
/// Shape and parameter validation fail fast; a degenerate side (no positive
/// mass) or a non-finite result reports [`Error::TransportFailed`] so the
/// caller can skip or default the pair.
pub fn solve_pair(
    a: &Array1<f32>,
    b: &Array1<f32>,
    cost: &Array2<f32>,
    reg: f32,
    max_iter: usize,
) -> Result<(Array2<f32>, f32)> {
    let m = a.len();
    let n = b.len();
    if cost.nrows() != m || cost.ncols() != n {
        return Err(Error::ShapeMismatch(m, n, cost.nrows(), cost.ncols()));
    }
    if reg <= 0.0 || !reg.is_finite() {
        return Err(Error::InvalidConfig("transport_reg must be positive and finite"));
    }
    if a.iter().any(|&x| x < 0.0) || b.iter().any(|&x| x < 0.0) {
        return Err(Error::TransportFailed("negative mass"));
    }

    let a_sum = a.sum();
    let b_sum = b.sum();
    if a_sum <= 0.0 || b_sum <= 0.0 {
        return Err(Error::TransportFailed("zero total mass"));
    }

    // Guard against upstream drift; rows are nominally already normalized.
    let a = a / (a_sum + EPSILON);
    let b = b / (b_sum + EPSILON);

    let log_a = a.mapv(|x| if x <= 0.0 { f32::NEG_INFINITY } else { x.ln() });
    let log_b = b.mapv(|x| if x <= 0.0 { f32::NEG_INFINITY } else { x.ln() });

    let mut f: Array1<f32> = Array1::zeros(m);
    let mut g: Array1<f32> = Array1::zeros(n);

    for _ in 0..max_iter {
        // f_i = ε (log a_i - logsumexp_j((g_j - C_ij) / ε))
        for i in 0..m {
            let lse = logsumexp_by(n, |j| (g[j] - cost[[i, j]]) / reg);
            f[i] = reg * (log_a[i] - lse);
        }
        // g_j = ε (log b_j - logsumexp_i((f_i - C_ij) / ε))
        for j in 0..n {
            let lse = logsumexp_by(m, |i| (f[i] - cost[[i, j]]) / reg);
            g[j] = reg * (log_b[j] - lse);
        }
    }

    let mut plan = Array2::zeros((m, n));
    let mut distance = 0.0f32;
    for i in 0..m {
        for j in 0..n {
            let log_p = (f[i] + g[j] - cost[[i, j]]) / reg;
            let pij = log_p.exp();
            plan[[i, j]] = pij;
            distance += pij * cost[[i, j]];
        }
    }

    if !distance.is_finite() || plan.iter().any(|p| !p.is_finite()) {
        return Err(Error::TransportFailed("non-finite plan"));
    }

    Ok((plan, distance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn identical_distributions_have_zero_distance() {
        let a = array![0.5, 0.5];
        let cost = array![[0.0, 1.0], [1.0, 0.0]];
        let (plan, distance) = solve_pair(&a, &a, &cost, 0.05, 200).unwrap();
        assert!(distance < 1e-3, "self-distance should vanish: {distance}");
        // Mass stays on the diagonal.
        assert!(plan[[0, 0]] > 0.4 && plan[[1, 1]] > 0.4);
    }

    #[test]
    fn point_masses_pay_the_ground_cost() {
        let a = array![1.0, 0.0];
        let b = array![0.0, 1.0];
        let cost = array![[0.0, 3.0], [3.0, 0.0]];
        let (plan, distance) = solve_pair(&a, &b, &cost, 0.05, 200).unwrap();
        assert!(
            (distance - 3.0).abs() < 0.05,
            "all mass moves at cost 3: {distance}"
        );
        assert!((plan[[0, 1]] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn marginals_match_the_inputs() {
        let a = array![0.7, 0.2, 0.1];
        let b = array![0.1, 0.1, 0.8];
        let mut cost = Array2::zeros((3, 3));
        for i in 0..3 {
            for j in 0..3 {
                cost[[i, j]] = (i as f32 - j as f32).abs();
            }
        }
        let (plan, _) = solve_pair(&a, &b, &cost, 0.05, 500).unwrap();
        for i in 0..3 {
            let row: f32 = (0..3).map(|j| plan[[i, j]]).sum();
            assert!((row - a[i]).abs() < 0.01, "row {i} marginal off: {row}");
        }
        for j in 0..3 {
            let col: f32 = (0..3).map(|i| plan[[i, j]]).sum();
            assert!((col - b[j]).abs() < 0.01, "col {j} marginal off: {col}");
        }
    }

    #[test]
    fn zero_mass_side_is_reported_not_panicked() {
        let a = array![0.0, 0.0];
        let b = array![0.5, 0.5];
        let cost = array![[0.0, 1.0], [1.0, 0.0]];
        assert!(matches!(
            solve_pair(&a, &b, &cost, 0.1, 50),
            Err(Error::TransportFailed(_))
        ));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let a = array![0.5, 0.5];
        let b = array![1.0];
        let cost = array![[0.0, 1.0], [1.0, 0.0]];
        assert!(matches!(
            solve_pair(&a, &b, &cost, 0.1, 50),
            Err(Error::ShapeMismatch(..))
        ));
    }

    #[test]
    fn single_support_pair_is_trivially_zero() {
        // The rolled-up Scenario A case: both recipes are all Whiskey.
        let a = array![1.0];
        let cost = Array2::zeros((1, 1));
        let (plan, distance) = solve_pair(&a, &a, &cost, 0.1, 50).unwrap();
        assert_eq!(distance, 0.0);
        assert!((plan[[0, 0]] - 1.0).abs() < 1e-5);
    }
}
