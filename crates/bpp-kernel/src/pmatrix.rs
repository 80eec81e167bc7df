//! Transition-probability matrix `P(t) = exp(Qt)` computation: a closed-form
//! fast path for JC69, and the general eigendecomposition-based path for
//! everything else. Both are grounded on `pll_core_update_pmatrix_4x4_jc69`
//! and `pll_core_update_pmatrix`.

use crate::eigen::EigenDecomposition;

/// Below this branch length the matrix is just the identity: same
/// threshold as the original (`t < 1e-100`).
const ZERO_BRANCH_THRESHOLD: f64 = 1e-100;

fn identity(states: usize) -> Vec<f64> {
    let mut m = vec![0.0; states * states];
    for i in 0..states {
        m[i * states + i] = 1.0;
    }
    m
}

/// Closed-form JC69 transition matrix for a 4-state alphabet. Uses
/// `expm1` for the numerically stable form:
/// `a = 1 + 3/4 * expm1(-4t/3)`, `b = -expm1(-4t/3)/4`.
pub fn jc69_pmatrix(branch_length: f64) -> Vec<f64> {
    debug_assert!(branch_length >= 0.0);
    if branch_length < ZERO_BRANCH_THRESHOLD {
        return identity(4);
    }
    let exptm1 = (-4.0 * branch_length / 3.0).exp_m1();
    let a = 1.0 + 0.75 * exptm1;
    let b = -exptm1 / 4.0;
    vec![
        a, b, b, b, //
        b, a, b, b, //
        b, b, a, b, //
        b, b, b, a,
    ]
}

/// General `P(t)` from an eigendecomposition, at a given branch length and
/// rate-category scalar. Uses the `expm1`-plus-identity trick from the
/// original to avoid cancellation when `Qt` is near zero: computes
/// `exp(Qt) - I` via `expm1` on the eigenvalues and adds `I` back at the
/// end, rather than exponentiating directly.
pub fn general_pmatrix(eigen: &EigenDecomposition, rate: f64, branch_length: f64) -> Vec<f64> {
    debug_assert!(branch_length >= 0.0);
    let n = eigen.states;
    if branch_length == 0.0 {
        return identity(n);
    }

    let expd: Vec<f64> = eigen
        .eigenvals
        .iter()
        .map(|&ev| (ev * rate * branch_length).exp_m1())
        .collect();

    let mut temp = vec![0.0; n * n];
    for j in 0..n {
        for k in 0..n {
            temp[j * n + k] = eigen.inv_eigenvecs[j * n + k] * expd[k];
        }
    }

    let mut pmat = vec![0.0; n * n];
    for j in 0..n {
        for k in 0..n {
            let mut acc = if j == k { 1.0 } else { 0.0 };
            for m in 0..n {
                acc += temp[j * n + m] * eigen.eigenvecs[m * n + k];
            }
            pmat[j * n + k] = acc;
        }
    }
    pmat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eigen::compute_eigen;

    #[test]
    fn zero_branch_length_is_identity() {
        let p = jc69_pmatrix(0.0);
        assert_eq!(p, identity(4));
    }

    #[test]
    fn rows_sum_to_one() {
        let p = jc69_pmatrix(0.5);
        for row in 0..4 {
            let sum: f64 = p[row * 4..(row + 1) * 4].iter().sum();
            assert!((sum - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn general_path_matches_jc69_closed_form() {
        let eig = compute_eigen(&vec![1.0; 6], &vec![0.25; 4], 4).unwrap();
        let general = general_pmatrix(&eig, 1.0, 0.3);
        let closed = jc69_pmatrix(0.3);
        for (g, c) in general.iter().zip(closed.iter()) {
            assert!((g - c).abs() < 1e-6, "{g} vs {c}");
        }
    }

    /// Literal scenario 5 (`spec.md` §8): JC69 at `t = 0.1`, diagonal
    /// `= 1 + 0.75 * expm1(-0.1333...)`, off-diagonal `= -0.25 *
    /// expm1(-0.1333...)`, row sums equal 1 to within 1e-15.
    #[test]
    fn jc69_at_t_one_tenth_matches_closed_form_constants() {
        let p = jc69_pmatrix(0.1);
        let exptm1 = (-4.0_f64 * 0.1 / 3.0).exp_m1();
        let diag = 1.0 + 0.75 * exptm1;
        let off = -0.25 * exptm1;
        for row in 0..4 {
            for col in 0..4 {
                let expected = if row == col { diag } else { off };
                assert!((p[row * 4 + col] - expected).abs() < 1e-15);
            }
            let sum: f64 = p[row * 4..(row + 1) * 4].iter().sum();
            assert!((sum - 1.0).abs() < 1e-15);
        }
    }

    #[test]
    fn entries_are_nonnegative_and_rows_sum_to_one_for_skewed_model() {
        let freqs = vec![0.1, 0.2, 0.3, 0.4];
        let params = vec![1.0, 2.0, 0.5, 1.5, 3.0, 1.0];
        let eig = compute_eigen(&params, &freqs, 4).unwrap();
        let p = general_pmatrix(&eig, 1.0, 0.7);
        for row in 0..4 {
            let slice = &p[row * 4..(row + 1) * 4];
            let sum: f64 = slice.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
            for &v in slice {
                assert!(v > -1e-9);
            }
        }
    }
}
