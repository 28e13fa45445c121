//! The low-rank representation `X ≈ U S V^T` of a two-dimensional field.

use faer::{Accum, linalg::matmul::matmul, prelude::*};

use crate::algorithms::truncation::{ordered_svd, select_rank};
use crate::error::{SylvesterError, SylvesterErrorKind};

/// A low-rank factorization `U S V^T`.
///
/// `U` (`nx × r`) and `V` (`ny × r`) have orthonormal columns and `S` is an `r × r` core,
/// diagonal whenever the state comes out of rank truncation. A state with `r = 0` is
/// legal and represents the zero field.
///
/// States are immutable: each solver step produces a new one.
#[derive(Clone, Debug)]
pub struct LowRankState {
    u: Mat<f64>,
    s: Mat<f64>,
    v: Mat<f64>,
}

impl LowRankState {
    /// Assembles a state from its factors, checking that their shapes agree.
    ///
    /// Orthonormality of `u` and `v` is the caller's responsibility; see
    /// [`LowRankState::orthogonality_defect`].
    pub fn new(u: Mat<f64>, s: Mat<f64>, v: Mat<f64>) -> Result<Self, SylvesterError> {
        if s.nrows() != s.ncols() {
            return Err(SylvesterErrorKind::DimensionMismatch {
                context: "square core S",
                expected: s.nrows(),
                found: s.ncols(),
            }
            .into());
        }
        if u.ncols() != s.nrows() {
            return Err(SylvesterErrorKind::DimensionMismatch {
                context: "columns of U vs. rank of S",
                expected: s.nrows(),
                found: u.ncols(),
            }
            .into());
        }
        if v.ncols() != s.ncols() {
            return Err(SylvesterErrorKind::DimensionMismatch {
                context: "columns of V vs. rank of S",
                expected: s.ncols(),
                found: v.ncols(),
            }
            .into());
        }
        Ok(Self { u, s, v })
    }

    /// The zero field on an `nx × ny` grid.
    pub fn zero(nx: usize, ny: usize) -> Self {
        Self {
            u: Mat::zeros(nx, 0),
            s: Mat::zeros(0, 0),
            v: Mat::zeros(ny, 0),
        }
    }

    /// Compresses a dense field through a direct SVD, keeping the singular values above
    /// `rel_tol · σ_max`, at most `max_rank` of them.
    pub fn from_dense(
        x: MatRef<'_, f64>,
        rel_tol: f64,
        max_rank: usize,
    ) -> Result<Self, SylvesterError> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Ok(Self::zero(x.nrows(), x.ncols()));
        }
        let svd = ordered_svd(x)?;
        let rank = select_rank(&svd.s, rel_tol, max_rank);
        Ok(Self {
            u: svd.u.as_ref().get(.., 0..rank).to_owned(),
            s: Mat::from_fn(rank, rank, |i, j| if i == j { svd.s[i] } else { 0.0 }),
            v: svd.v.as_ref().get(.., 0..rank).to_owned(),
        })
    }

    #[inline]
    pub fn u(&self) -> MatRef<'_, f64> {
        self.u.as_ref()
    }

    #[inline]
    pub fn s(&self) -> MatRef<'_, f64> {
        self.s.as_ref()
    }

    #[inline]
    pub fn v(&self) -> MatRef<'_, f64> {
        self.v.as_ref()
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.s.nrows()
    }

    /// Number of grid rows (`nx`).
    #[inline]
    pub fn nrows(&self) -> usize {
        self.u.nrows()
    }

    /// Number of grid columns (`ny`).
    #[inline]
    pub fn ncols(&self) -> usize {
        self.v.nrows()
    }

    /// `S[0, 0]`, the leading singular value of a truncated state; zero for `r = 0`.
    pub fn leading_value(&self) -> f64 {
        if self.rank() == 0 {
            0.0
        } else {
            self.s[(0, 0)]
        }
    }

    /// Singular values held on the diagonal of `S`.
    pub fn singular_values(&self) -> Vec<f64> {
        (0..self.rank()).map(|i| self.s[(i, i)]).collect()
    }

    /// Reconstructs the dense field `U S V^T`. Meant for diagnostics and tests; the solver
    /// itself never forms it.
    pub fn to_dense(&self) -> Mat<f64> {
        let mut us = Mat::<f64>::zeros(self.nrows(), self.rank());
        matmul(
            us.as_mut(),
            Accum::Replace,
            self.u.as_ref(),
            self.s.as_ref(),
            1.0,
            Par::Seq,
        );
        let mut x = Mat::<f64>::zeros(self.nrows(), self.ncols());
        matmul(
            x.as_mut(),
            Accum::Replace,
            us.as_ref(),
            self.v.as_ref().transpose(),
            1.0,
            Par::Seq,
        );
        x
    }

    /// Returns `(‖U^T U − I‖_F, ‖V^T V − I‖_F)`.
    pub fn orthogonality_defect(&self) -> (f64, f64) {
        let defect = |q: MatRef<'_, f64>| {
            let gram = q.transpose() * q;
            let identity = Mat::<f64>::identity(q.ncols(), q.ncols());
            (&gram - &identity).norm_l2()
        };
        (defect(self.u.as_ref()), defect(self.v.as_ref()))
    }
}
