//! Rate matrix construction and eigendecomposition for a reversible
//! substitution model. Grounded directly on `create_ratematrix`,
//! `mytred2`, `mytqli`, and `pll_update_eigen` in the original kernel: the
//! GTR-style rate matrix is made symmetric by the usual `sqrt(pi) Q
//! sqrt(pi)^-1` similarity transform, Householder-reduced to tridiagonal
//! form (`tred2`), then diagonalized by implicit-shift QL (`tqli`).
//!
//! `states_padded == states` throughout: the original pads row strides for
//! SSE/AVX alignment, a vectorization concern this port does not carry
//! (see `DESIGN.md`), so every `states_padded` index in the C source
//! collapses to plain `states` here.

use bpp_error::{bpp_err, BppResult};

/// Maximum QL sweeps per eigenvalue before giving up, matching the
/// `assert(iter < 30)` cap in the original.
const MAX_QL_ITER: u32 = 30;

/// A substitution model's eigendecomposition: `Q = eigenvecs * diag(eigenvals)
/// * inv_eigenvecs`, all flattened row-major, `states` wide.
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    pub states: usize,
    pub eigenvecs: Vec<f64>,
    pub inv_eigenvecs: Vec<f64>,
    pub eigenvals: Vec<f64>,
}

/// Builds the symmetrized rate matrix `sqrt(pi) Q sqrt(pi)^-1` from the
/// upper-triangular exchangeability parameters and equilibrium
/// frequencies, scaled so the average substitution rate is 1.
/// `subst_params` has `states*(states-1)/2` entries; the last is
/// conventionally normalized to 1 (as with `create_ratematrix`), but any
/// positive last entry is accepted and used to rescale the rest.
fn build_rate_matrix(subst_params: &[f64], frequencies: &[f64], states: usize) -> Vec<Vec<f64>> {
    let param_count = states * (states - 1) / 2;
    debug_assert_eq!(subst_params.len(), param_count);
    debug_assert_eq!(frequencies.len(), states);

    let mut params = subst_params.to_vec();
    let last = params[param_count - 1];
    if last > 0.0 {
        for p in params.iter_mut() {
            *p /= last;
        }
    }

    let mut q = vec![vec![0.0; states]; states];
    let mut k = 0;
    for i in 0..states {
        for j in (i + 1)..states {
            let factor = params[k];
            k += 1;
            let off = factor * (frequencies[i] * frequencies[j]).sqrt();
            q[i][j] = off;
            q[j][i] = off;
            q[i][i] -= factor * frequencies[j];
            q[j][j] -= factor * frequencies[i];
        }
    }

    let mut mean = 0.0;
    for i in 0..states {
        mean += frequencies[i] * (-q[i][i]);
    }
    for row in q.iter_mut() {
        for v in row.iter_mut() {
            *v /= mean;
        }
    }
    q
}

/// Householder tridiagonalization, accumulating the orthogonal transform
/// into `a` in place. Returns `(d, e)`: the diagonal and subdiagonal of the
/// tridiagonal form.
fn tred2(a: &mut [Vec<f64>], n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut d = vec![0.0; n];
    let mut e = vec![0.0; n];

    for i in (2..=n).rev() {
        let l = i - 1;
        let mut h = 0.0;
        let mut scale = 0.0;
        if l > 1 {
            for k in 1..=l {
                scale += a[k - 1][i - 1].abs();
            }
            if scale == 0.0 {
                e[i - 1] = a[l - 1][i - 1];
            } else {
                for k in 1..=l {
                    a[k - 1][i - 1] /= scale;
                    h += a[k - 1][i - 1] * a[k - 1][i - 1];
                }
                let f = a[l - 1][i - 1];
                let g = if f > 0.0 { -h.sqrt() } else { h.sqrt() };
                e[i - 1] = scale * g;
                h -= f * g;
                a[l - 1][i - 1] = f - g;
                let mut f_acc = 0.0;
                for j in 1..=l {
                    a[i - 1][j - 1] = a[j - 1][i - 1] / h;
                    let mut g2 = 0.0;
                    for k in 1..=j {
                        g2 += a[k - 1][j - 1] * a[k - 1][i - 1];
                    }
                    for k in (j + 1)..=l {
                        g2 += a[j - 1][k - 1] * a[k - 1][i - 1];
                    }
                    e[j - 1] = g2 / h;
                    f_acc += e[j - 1] * a[j - 1][i - 1];
                }
                let hh = f_acc / (h + h);
                for j in 1..=l {
                    let fj = a[j - 1][i - 1];
                    let gj = e[j - 1] - hh * fj;
                    e[j - 1] = gj;
                    for k in 1..=j {
                        a[k - 1][j - 1] -= fj * e[k - 1] + gj * a[k - 1][i - 1];
                    }
                }
            }
        } else {
            e[i - 1] = a[l - 1][i - 1];
        }
        d[i - 1] = h;
    }
    d[0] = 0.0;
    e[0] = 0.0;

    for i in 1..=n {
        let l = i - 1;
        if d[i - 1] != 0.0 {
            for j in 1..=l {
                let mut g = 0.0;
                for k in 1..=l {
                    g += a[k - 1][i - 1] * a[j - 1][k - 1];
                }
                for k in 1..=l {
                    a[j - 1][k - 1] -= g * a[i - 1][k - 1];
                }
            }
        }
        d[i - 1] = a[i - 1][i - 1];
        a[i - 1][i - 1] = 1.0;
        for j in 1..=l {
            a[i - 1][j - 1] = 0.0;
            a[j - 1][i - 1] = 0.0;
        }
    }
    (d, e)
}

/// Implicit-shift QL with accumulated eigenvector transform, diagonalizing
/// the tridiagonal form `(d, e)` produced by [`tred2`] in place. `z` holds
/// (and is updated with) the eigenvectors, one per row.
fn tqli(d: &mut [f64], e: &mut [f64], n: usize, z: &mut [Vec<f64>]) -> BppResult<()> {
    for i in 2..=n {
        e[i - 2] = e[i - 1];
    }
    e[n - 1] = 0.0;

    for l in 1..=n {
        let mut iter = 0u32;
        loop {
            let mut m = l;
            while m <= n - 1 {
                let dd = d[m - 1].abs() + d[m].abs();
                if e[m - 1].abs() + dd == dd {
                    break;
                }
                m += 1;
            }
            if m == l {
                break;
            }
            if iter >= MAX_QL_ITER {
                return Err(bpp_err!(
                    Numerical: "QL eigendecomposition did not converge after {} sweeps",
                    MAX_QL_ITER
                ));
            }
            iter += 1;

            let mut g = (d[l] - d[l - 1]) / (2.0 * e[l - 1]);
            let mut r = (g * g + 1.0).sqrt();
            g = d[m - 1] - d[l - 1] + e[l - 1] / (g + if g < 0.0 { -r.abs() } else { r.abs() });
            let mut s = 1.0;
            let mut c = 1.0;
            let mut p = 0.0;

            let mut i = m - 1;
            loop {
                let mut f = s * e[i - 1];
                let b = c * e[i - 1];
                if f.abs() >= g.abs() {
                    let ctmp = g / f;
                    r = (ctmp * ctmp + 1.0).sqrt();
                    e[i] = f * r;
                    s = 1.0 / r;
                    c = ctmp * s;
                } else {
                    let stmp = f / g;
                    r = (stmp * stmp + 1.0).sqrt();
                    e[i] = g * r;
                    c = 1.0 / r;
                    s = stmp * c;
                }
                g = d[i] - p;
                r = (d[i - 1] - g) * s + 2.0 * c * b;
                p = s * r;
                d[i] = g + p;
                g = c * r - b;
                for k in 1..=n {
                    f = z[i][k - 1];
                    z[i][k - 1] = s * z[i - 1][k - 1] + c * f;
                    z[i - 1][k - 1] = c * z[i - 1][k - 1] - s * f;
                }
                if i == l {
                    break;
                }
                i -= 1;
            }

            d[l - 1] -= p;
            e[l - 1] = g;
            e[m - 1] = 0.0;
        }
    }
    Ok(())
}

/// Computes the eigendecomposition of the reversible rate matrix implied by
/// `subst_params` and `frequencies`. `states` is the alphabet size (4 for
/// nucleotides).
pub fn compute_eigen(
    subst_params: &[f64],
    frequencies: &[f64],
    states: usize,
) -> BppResult<EigenDecomposition> {
    let mut a = build_rate_matrix(subst_params, frequencies, states);
    let (mut d, mut e) = tred2(&mut a, states);
    tqli(&mut d, &mut e, states, &mut a)?;

    let mut eigenvecs = vec![0.0; states * states];
    for i in 0..states {
        eigenvecs[i * states..(i + 1) * states].copy_from_slice(&a[i]);
    }

    // a is orthogonal (real symmetric eigenproblem), so its inverse is its
    // transpose; the rescaling below folds in the sqrt(pi) similarity
    // transform undone earlier by build_rate_matrix.
    let mut inv_eigenvecs = vec![0.0; states * states];
    for i in 0..states {
        for j in 0..states {
            inv_eigenvecs[i * states + j] = eigenvecs[j * states + i];
        }
    }
    for i in 0..states {
        let scale = frequencies[i].sqrt();
        for j in 0..states {
            inv_eigenvecs[i * states + j] /= scale;
        }
    }
    for j in 0..states {
        let scale = frequencies[j].sqrt();
        for i in 0..states {
            eigenvecs[i * states + j] *= scale;
        }
    }

    Ok(EigenDecomposition {
        states,
        eigenvecs,
        inv_eigenvecs,
        eigenvals: d,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jc69_params() -> Vec<f64> {
        vec![1.0; 6]
    }
    fn uniform_freqs() -> Vec<f64> {
        vec![0.25; 4]
    }

    #[test]
    fn jc69_eigenvalues_are_0_and_neg4_3() {
        let eig = compute_eigen(&jc69_params(), &uniform_freqs(), 4).unwrap();
        let mut vals = eig.eigenvals.clone();
        vals.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((vals[0] - (-4.0 / 3.0)).abs() < 1e-8);
        assert!((vals[3] - 0.0).abs() < 1e-8);
    }

    #[test]
    fn eigenvecs_and_inv_eigenvecs_are_mutual_inverses() {
        let eig = compute_eigen(&jc69_params(), &uniform_freqs(), 4).unwrap();
        let n = eig.states;
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += eig.eigenvecs[i * n + k] * eig.inv_eigenvecs[k * n + j];
                }
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((sum - expected).abs() < 1e-6, "({i},{j}): {sum}");
            }
        }
    }

    #[test]
    fn asymmetric_frequencies_still_yield_orthonormal_reconstruction() {
        let freqs = vec![0.1, 0.2, 0.3, 0.4];
        let params = vec![1.0, 2.0, 0.5, 1.5, 3.0, 1.0];
        let eig = compute_eigen(&params, &freqs, 4).unwrap();
        let n = eig.states;
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += eig.eigenvecs[i * n + k] * eig.inv_eigenvecs[k * n + j];
                }
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((sum - expected).abs() < 1e-6, "({i},{j}): {sum}");
            }
        }
    }
}
