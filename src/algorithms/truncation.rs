//! Rank truncation of the reduced core.
//!
//! After the reduced equation is solved the approximation is `U S V^T` with a full,
//! generally dense core `S`. Truncation diagonalizes `S` through a singular value
//! decomposition, drops the directions whose singular values fall below a relative
//! threshold, and rotates the bases accordingly:
//!
//! `S = Ũ Σ Ṽ^T`, `U_new = U Ũ[:, :r]`, `V_new = V Ṽ[:, :r]`, `S_new = Σ[:r, :r]`.
//!
//! Since `U`, `V`, `Ũ` and `Ṽ` all have orthonormal columns, so do the new bases.

use faer::{Accum, linalg::matmul::matmul, prelude::*};

use crate::error::{SylvesterError, SylvesterErrorKind};
use crate::state::LowRankState;

/// A thin singular value decomposition whose singular values are guaranteed to be sorted
/// in descending order.
#[derive(Clone, Debug)]
pub struct OrderedSvd {
    pub u: Mat<f64>,
    pub s: Vec<f64>,
    pub v: Mat<f64>,
}

/// Computes the thin SVD of `m`, with singular values in descending order.
///
/// Rank selection relies on `s[0]` being the largest value and on the kept directions
/// forming a prefix. [`faer`] documents its output as ordered, but the order is checked
/// here and restored (together with the matching singular vectors) if it is ever
/// violated.
pub fn ordered_svd(m: MatRef<'_, f64>) -> Result<OrderedSvd, SylvesterError> {
    let svd = m
        .thin_svd()
        .map_err(|e| SylvesterErrorKind::SvdError(format!("{e:?}")))?;
    let k = m.nrows().min(m.ncols());
    let sigma = svd.S();
    let s: Vec<f64> = (0..k).map(|i| sigma[i]).collect();

    Ok(into_descending(svd.U().to_owned(), s, svd.V().to_owned()))
}

/// Sorts a singular triplet into descending order, permuting the columns of `u` and `v`
/// along with `s`. Already sorted input is returned unchanged.
fn into_descending(u: Mat<f64>, s: Vec<f64>, v: Mat<f64>) -> OrderedSvd {
    if is_descending(&s) {
        return OrderedSvd { u, s, v };
    }

    let k = s.len();
    log::trace!("Reordering {} singular values into descending order.", k);
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));
    OrderedSvd {
        u: Mat::from_fn(u.nrows(), k, |i, j| u[(i, order[j])]),
        s: order.iter().map(|&j| s[j]).collect(),
        v: Mat::from_fn(v.nrows(), k, |i, j| v[(i, order[j])]),
    }
}

#[inline]
fn is_descending(s: &[f64]) -> bool {
    s.windows(2).all(|w| w[0] >= w[1])
}

/// Number of singular values to keep: those strictly above `rel_tol · s[0]`, capped at
/// `max_rank`. Expects `s` in descending order.
///
/// An all-zero spectrum yields zero.
pub fn select_rank(s: &[f64], rel_tol: f64, max_rank: usize) -> usize {
    let Some(&sigma_max) = s.first() else {
        return 0;
    };
    let threshold = rel_tol * sigma_max;
    s.iter()
        .take_while(|&&sigma| sigma > threshold)
        .count()
        .min(max_rank)
}

/// Truncates `basis_u · core · basis_v^T` to a [`LowRankState`] with diagonal core.
///
/// `basis_u` is `nx × p`, `core` is `p × q` and `basis_v` is `ny × q`. A rank of zero
/// produces the zero state on the `nx × ny` grid.
pub fn truncate(
    basis_u: MatRef<'_, f64>,
    core: MatRef<'_, f64>,
    basis_v: MatRef<'_, f64>,
    rel_tol: f64,
    max_rank: usize,
    par: Par,
) -> Result<LowRankState, SylvesterError> {
    if basis_u.ncols() != core.nrows() {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "left basis vs. reduced core",
            expected: core.nrows(),
            found: basis_u.ncols(),
        }
        .into());
    }
    if basis_v.ncols() != core.ncols() {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "right basis vs. reduced core",
            expected: core.ncols(),
            found: basis_v.ncols(),
        }
        .into());
    }
    if core.nrows() == 0 || core.ncols() == 0 {
        return Ok(LowRankState::zero(basis_u.nrows(), basis_v.nrows()));
    }

    let svd = ordered_svd(core)?;
    let rank = select_rank(&svd.s, rel_tol, max_rank);
    if rank == 0 {
        log::debug!("Truncation discarded every direction; returning the zero state.");
        return Ok(LowRankState::zero(basis_u.nrows(), basis_v.nrows()));
    }

    let mut u_new = Mat::<f64>::zeros(basis_u.nrows(), rank);
    matmul(
        u_new.as_mut(),
        Accum::Replace,
        basis_u,
        svd.u.as_ref().get(.., 0..rank),
        1.0,
        par,
    );
    let mut v_new = Mat::<f64>::zeros(basis_v.nrows(), rank);
    matmul(
        v_new.as_mut(),
        Accum::Replace,
        basis_v,
        svd.v.as_ref().get(.., 0..rank),
        1.0,
        par,
    );
    let s_new = Mat::from_fn(rank, rank, |i, j| if i == j { svd.s[i] } else { 0.0 });

    LowRankState::new(u_new, s_new, v_new)
}
