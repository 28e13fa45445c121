//! Projection onto the current bases and solution of the small reduced equation.
//!
//! Given orthonormal bases `U` (`nx × p`) and `V` (`ny × q`), the large equation
//! `A1 X + X A2^T + U_old S_old V_old^T = 0` is Galerkin-projected onto
//! `X = U S V^T`, which leaves the `p × q` Sylvester equation
//!
//! `A1~ S + S A2~^T + B1~ = 0`, with `A1~ = U^T A1 U`, `A2~ = V^T A2 V` and
//! `B1~ = (U^T U_old) S_old (V_old^T V)`.
//!
//! It is solved with the Bartels–Stewart algorithm: both coefficient matrices are brought
//! to real Schur form, the transformed equation is solved by a sweep over the columns of
//! the quasi-triangular right factor, and the result is transformed back.

use faer::{Accum, linalg::matmul::matmul, prelude::*};

use crate::algorithms::schur::{RealSchur, block_size, real_schur};
use crate::backend::ComputeBackend;
use crate::error::{SylvesterError, SylvesterErrorKind};
use crate::state::LowRankState;

/// The projected coefficients of the reduced equation, in host memory.
#[derive(Clone, Debug)]
pub struct ReducedSystem {
    pub a1: Mat<f64>,
    pub a2: Mat<f64>,
    pub b1: Mat<f64>,
}

impl ReducedSystem {
    /// Projects the equation onto `u`/`v`, given the operators already applied to the
    /// bases (`a1u = A1 U`, `a2v = A2 V`).
    ///
    /// The products run in backend residency; only the three projected coefficients are
    /// copied back to the host, where the reduced equation is solved.
    pub fn project(
        backend: &dyn ComputeBackend,
        u: MatRef<'_, f64>,
        a1u: MatRef<'_, f64>,
        v: MatRef<'_, f64>,
        a2v: MatRef<'_, f64>,
        previous: &LowRankState,
    ) -> Result<Self, SylvesterError> {
        let ut = backend.to_device(u.transpose())?;
        let vt = backend.to_device(v.transpose())?;

        let a1 = backend.product(&ut, &backend.to_device(a1u)?)?;
        let a2 = backend.product(&vt, &backend.to_device(a2v)?)?;

        let left = backend.product(&ut, &backend.to_device(previous.u())?)?;
        let right = backend.product(
            &backend.to_device(previous.v().transpose())?,
            &backend.to_device(v)?,
        )?;
        let left_s = backend.product(&left, &backend.to_device(previous.s())?)?;
        let b1 = backend.product(&left_s, &right)?;

        backend.synchronize()?;
        Ok(Self {
            a1: backend.to_host(&a1)?,
            a2: backend.to_host(&a2)?,
            b1: backend.to_host(&b1)?,
        })
    }

    /// Solves `A1~ S + S A2~^T + B1~ = 0` for the reduced core `S`.
    pub fn solve(&self) -> Result<Mat<f64>, SylvesterError> {
        solve_reduced_sylvester(self.a1.as_ref(), self.a2.as_ref(), self.b1.as_ref())
    }
}

/// Solves `a S + S b^T + c = 0` by the Bartels–Stewart algorithm.
///
/// `a` is `p × p`, `b` is `q × q`, `c` and the returned `S` are `p × q`.
///
/// # Errors
///
/// * `DimensionMismatch` if the shapes are inconsistent.
/// * `SingularSylvester` if `λ_i(a) + λ_j(b)` vanishes (relative to the magnitude of the
///   coefficients) for some pair of eigenvalues.
/// * `SchurNoConvergence` if either Schur decomposition fails.
pub fn solve_reduced_sylvester(
    a: MatRef<'_, f64>,
    b: MatRef<'_, f64>,
    c: MatRef<'_, f64>,
) -> Result<Mat<f64>, SylvesterError> {
    let (p, q) = (a.nrows(), b.nrows());
    if c.nrows() != p {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "rows of reduced right-hand side",
            expected: p,
            found: c.nrows(),
        }
        .into());
    }
    if c.ncols() != q {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "columns of reduced right-hand side",
            expected: q,
            found: c.ncols(),
        }
        .into());
    }
    if p == 0 || q == 0 {
        return Ok(Mat::zeros(p, q));
    }

    let RealSchur { q: qa, t: ta } = real_schur(a)?;
    let RealSchur { q: qb, t: tb } = real_schur(b.transpose())?;

    // F = -Qa^T C Qb
    let mut tmp = Mat::<f64>::zeros(p, q);
    matmul(tmp.as_mut(), Accum::Replace, c, qb.as_ref(), 1.0, Par::Seq);
    let mut f = Mat::<f64>::zeros(p, q);
    matmul(f.as_mut(), Accum::Replace, qa.as_ref().transpose(), tmp.as_ref(), -1.0, Par::Seq);

    let y = solve_quasi_triangular(ta.as_ref(), tb.as_ref(), f.as_ref())?;

    // S = Qa Y Qb^T
    matmul(tmp.as_mut(), Accum::Replace, qa.as_ref(), y.as_ref(), 1.0, Par::Seq);
    let mut s = Mat::<f64>::zeros(p, q);
    matmul(s.as_mut(), Accum::Replace, tmp.as_ref(), qb.as_ref().transpose(), 1.0, Par::Seq);
    Ok(s)
}

/// Solves `ta Y + Y tb = f` for upper quasi-triangular `ta` and `tb`.
fn solve_quasi_triangular(
    ta: MatRef<'_, f64>,
    tb: MatRef<'_, f64>,
    f: MatRef<'_, f64>,
) -> Result<Mat<f64>, SylvesterError> {
    let (p, q) = (ta.nrows(), tb.nrows());
    let scale = (max_abs(ta) + max_abs(tb)).max(f64::MIN_POSITIVE);
    let pivot_tol = f64::EPSILON * scale;

    let mut row_blocks = Vec::new();
    let mut i = 0;
    while i < p {
        let size = block_size(ta, i);
        row_blocks.push((i, size));
        i += size;
    }

    let mut y = Mat::<f64>::zeros(p, q);
    let mut j = 0;
    while j < q {
        let bs = block_size(tb, j);

        // rhs = F[:, j..j+bs] - Y[:, :j] Tb[:j, j..j+bs]
        let mut rhs = f.get(.., j..j + bs).to_owned();
        if j > 0 {
            matmul(
                rhs.as_mut(),
                Accum::Add,
                y.as_ref().get(.., 0..j),
                tb.get(0..j, j..j + bs),
                -1.0,
                Par::Seq,
            );
        }

        for &(i, size) in row_blocks.iter().rev() {
            let below = i + size;
            let mut system = [[0.0; 4]; 4];
            let mut values = [0.0; 4];
            let dim = size * bs;

            for c in 0..bs {
                for r in 0..size {
                    let mut g = rhs[(i + r, c)];
                    for k in below..p {
                        g -= ta[(i + r, k)] * y[(k, j + c)];
                    }
                    values[c * size + r] = g;
                }
            }

            // Unknown `c * size + r` is Y[i + r, j + c]. Each equation couples the Ta block
            // (within a column) with the Tb block (across columns).
            for c in 0..bs {
                for r in 0..size {
                    let eq = c * size + r;
                    for r2 in 0..size {
                        system[eq][c * size + r2] += ta[(i + r, i + r2)];
                    }
                    for c2 in 0..bs {
                        system[eq][c2 * size + r] += tb[(j + c2, j + c)];
                    }
                }
            }

            if !solve_small(&mut system, &mut values, dim, pivot_tol) {
                return Err(SylvesterErrorKind::SingularSylvester { row: i, col: j }.into());
            }
            for c in 0..bs {
                for r in 0..size {
                    y[(i + r, j + c)] = values[c * size + r];
                }
            }
        }
        j += bs;
    }
    Ok(y)
}

fn max_abs(m: MatRef<'_, f64>) -> f64 {
    let mut out = 0.0f64;
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            out = out.max(m[(i, j)].abs());
        }
    }
    out
}

/// Gaussian elimination with partial pivoting on the leading `n × n` part of `m`.
/// Returns `false` if a pivot falls below `tol`.
fn solve_small(m: &mut [[f64; 4]; 4], b: &mut [f64; 4], n: usize, tol: f64) -> bool {
    for k in 0..n {
        let pivot_row = (k..n)
            .max_by(|&x, &y| m[x][k].abs().total_cmp(&m[y][k].abs()))
            .unwrap_or(k);
        if !(m[pivot_row][k].abs() > tol) {
            return false;
        }
        m.swap(k, pivot_row);
        b.swap(k, pivot_row);

        for r in k + 1..n {
            let factor = m[r][k] / m[k][k];
            for c in k..n {
                m[r][c] -= factor * m[k][c];
            }
            b[r] -= factor * b[k];
        }
    }
    for k in (0..n).rev() {
        let mut sum = b[k];
        for c in k + 1..n {
            sum -= m[k][c] * b[c];
        }
        b[k] = sum / m[k][k];
    }
    true
}
