//! Cheap a posteriori estimate of the residual of the projected solution.
//!
//! With `X = U S V^T` the residual of the full equation restricted to the bases is
//!
//! `R = A1 U S V^T + U S (A2 V)^T + U B1~ V^T = [U | A1 U] M [V | A2 V]^T`,
//! `M = [[B1~, S], [S, 0]]`.
//!
//! Factoring `[U | A1 U] = QU RU` and `[V | A2 V] = QV RV` and using the orthonormality of
//! `QU`, `QV` gives `‖R‖₂ = ‖RU M RV^T‖₂`, a matrix whose size is independent of the
//! grid.

use faer::{Accum, linalg::matmul::matmul, prelude::*};

use crate::algorithms::truncation::ordered_svd;
use crate::backend::ComputeBackend;
use crate::error::{SylvesterError, SylvesterErrorKind};
use crate::workspace::SideWorkspace;

/// Returns the spectral norm of the projected residual for the reduced core `s`.
///
/// Both sides must hold a basis and the operator applied to it (see
/// [`crate::algorithms::krylov::apply_to_basis`]).
pub fn estimate_residual(
    backend: &dyn ComputeBackend,
    left: &mut SideWorkspace,
    right: &mut SideWorkspace,
    b1: MatRef<'_, f64>,
    s: MatRef<'_, f64>,
) -> Result<f64, SylvesterError> {
    let (p, q) = (left.ncols(), right.ncols());
    if s.nrows() != p || b1.nrows() != p {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "reduced core rows vs. left basis",
            expected: p,
            found: if s.nrows() != p { s.nrows() } else { b1.nrows() },
        }
        .into());
    }
    if s.ncols() != q || b1.ncols() != q {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "reduced core columns vs. right basis",
            expected: q,
            found: if s.ncols() != q { s.ncols() } else { b1.ncols() },
        }
        .into());
    }
    if p == 0 || q == 0 {
        return Ok(0.0);
    }

    let ru = stacked_r_factor(left);
    let rv = stacked_r_factor(right);

    let mut m = Mat::<f64>::zeros(2 * p, 2 * q);
    m.as_mut().get_mut(0..p, 0..q).copy_from(b1);
    m.as_mut().get_mut(0..p, q..2 * q).copy_from(s);
    m.as_mut().get_mut(p..2 * p, 0..q).copy_from(s);

    let mut rm = Mat::<f64>::zeros(ru.nrows(), 2 * q);
    matmul(rm.as_mut(), Accum::Replace, ru.as_ref(), m.as_ref(), 1.0, Par::Seq);
    let mut residual = Mat::<f64>::zeros(ru.nrows(), rv.nrows());
    matmul(
        residual.as_mut(),
        Accum::Replace,
        rm.as_ref(),
        rv.as_ref().transpose(),
        1.0,
        Par::Seq,
    );

    backend.synchronize()?;
    spectral_norm(residual.as_ref())
}

/// Upper trapezoidal factor of the thin QR of `[basis | applied]`, copied to the host.
fn stacked_r_factor(side: &mut SideWorkspace) -> Mat<f64> {
    let k = side.ncols;
    let mut stacked = side.stacked.as_mut();
    stacked
        .rb_mut()
        .get_mut(.., 0..k)
        .copy_from(side.basis.as_ref().get(.., 0..k));
    stacked
        .rb_mut()
        .get_mut(.., k..2 * k)
        .copy_from(side.applied.as_ref().get(.., 0..k));

    let qr = side.stacked.as_ref().get(.., 0..2 * k).qr();
    qr.thin_R().to_owned()
}

/// Largest singular value of `m`; zero for an empty matrix.
pub fn spectral_norm(m: MatRef<'_, f64>) -> Result<f64, SylvesterError> {
    if m.nrows() == 0 || m.ncols() == 0 {
        return Ok(0.0);
    }
    Ok(ordered_svd(m)?.s.first().copied().unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::krylov::{apply_to_basis, extend_basis};
    use crate::algorithms::reduced::ReducedSystem;
    use crate::backend::HostBackend;
    use crate::operator::PreparedOperator;
    use crate::state::LowRankState;
    use crate::workspace::KrylovWorkspace;
    use faer::mat;

    fn tridiagonal(n: usize, diag: f64) -> Mat<f64> {
        Mat::from_fn(n, n, |i, j| {
            if i == j {
                diag
            } else if i.abs_diff(j) == 1 {
                1.0
            } else {
                0.0
            }
        })
    }

    fn unit_column(n: usize) -> Mat<f64> {
        let raw = Mat::<f64>::from_fn(n, 1, |i, _| ((i + 1) as f64).sqrt());
        raw.as_ref().qr().compute_thin_Q()
    }

    #[test]
    fn test_spectral_norm() {
        let m: Mat<f64> = mat![[3.0, 0.0], [0.0, -4.0]];
        assert!((spectral_norm(m.as_ref()).unwrap() - 4.0).abs() < 1e-14);
        assert_eq!(spectral_norm(Mat::<f64>::zeros(0, 3).as_ref()).unwrap(), 0.0);
    }

    #[test]
    fn test_estimate_matches_dense_projected_residual() {
        let (nx, ny) = (16, 12);
        let a1 = tridiagonal(nx, -3.0);
        let a2 = tridiagonal(ny, -2.5);
        let op1 = PreparedOperator::new("A1", a1.clone()).unwrap();
        let op2 = PreparedOperator::new("A2", a2.clone()).unwrap();

        let u_old = unit_column(nx);
        let v_old = unit_column(ny);
        let previous =
            LowRankState::new(u_old, Mat::from_fn(1, 1, |_, _| 1.5), v_old).unwrap();

        let mut ws = KrylovWorkspace::new(nx, ny, 1, 2);
        ws.reset(&previous);
        extend_basis(&HostBackend, &op1, &mut ws.left).unwrap();
        extend_basis(&HostBackend, &op2, &mut ws.right).unwrap();
        apply_to_basis(&HostBackend, &op1, &mut ws.left).unwrap();
        apply_to_basis(&HostBackend, &op2, &mut ws.right).unwrap();

        let system = ReducedSystem::project(
            &HostBackend,
            ws.left().basis(),
            ws.left().applied(),
            ws.right().basis(),
            ws.right().applied(),
            &previous,
        )
        .unwrap();
        let s = system.solve().unwrap();

        let estimate = estimate_residual(
            &HostBackend,
            &mut ws.left,
            &mut ws.right,
            system.b1.as_ref(),
            s.as_ref(),
        )
        .unwrap();

        // Dense residual A1 X + X A2^T + U_old S_old V_old^T of X = U S V^T.
        let u = ws.left().basis();
        let v = ws.right().basis();
        let x = u * s.as_ref() * v.transpose();
        let b = previous.to_dense();
        let r = a1.as_ref() * x.as_ref() + x.as_ref() * a2.as_ref().transpose() + b;
        let exact = spectral_norm(r.as_ref()).unwrap();

        assert!(estimate > 0.0);
        assert!(
            (estimate - exact).abs() < 1e-10 * exact.max(1.0),
            "estimate {estimate} vs. dense {exact}"
        );
    }

    #[test]
    fn test_estimate_vanishes_when_basis_spans_the_grid() {
        // One round on a 3-point grid already spans the whole space, so the Galerkin
        // solution is the exact solution.
        let n = 3;
        let a1 = Mat::<f64>::from_fn(n, n, |i, j| if i == j { -1.0 - i as f64 } else { 0.0 });
        let op1 = PreparedOperator::new("A1", a1.clone()).unwrap();
        let op2 = PreparedOperator::new("A2", a1).unwrap();
        let start = unit_column(n);
        let previous =
            LowRankState::new(start.clone(), Mat::from_fn(1, 1, |_, _| 1.0), start).unwrap();

        let mut ws = KrylovWorkspace::new(n, n, 1, 1);
        ws.reset(&previous);
        extend_basis(&HostBackend, &op1, &mut ws.left).unwrap();
        extend_basis(&HostBackend, &op2, &mut ws.right).unwrap();
        assert_eq!(ws.left().ncols(), n);
        apply_to_basis(&HostBackend, &op1, &mut ws.left).unwrap();
        apply_to_basis(&HostBackend, &op2, &mut ws.right).unwrap();

        let system = ReducedSystem::project(
            &HostBackend,
            ws.left().basis(),
            ws.left().applied(),
            ws.right().basis(),
            ws.right().applied(),
            &previous,
        )
        .unwrap();
        let s = system.solve().unwrap();
        let estimate = estimate_residual(
            &HostBackend,
            &mut ws.left,
            &mut ws.right,
            system.b1.as_ref(),
            s.as_ref(),
        )
        .unwrap();
        assert!(estimate < 1e-12, "{estimate}");
    }
}
