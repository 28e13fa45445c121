//! Extended Krylov basis construction.
//!
//! Each round enlarges the basis of one side with one forward block (`A · prev`) and one
//! inverse block (`A \ prev`), then re-orthonormalizes the whole augmented matrix with a
//! thin QR factorization:
//!
//! `basis <- orth([basis | A · fwd_prev | A^{-1} · inv_prev])`
//!
//! After `k` rounds the basis spans `K_k(A, U_old) + K_k(A^{-1}, A^{-1} U_old)`, the
//! extended Krylov subspace.
//!
//! All buffers come from a [`SideWorkspace`]; nothing here allocates except the QR
//! factorization itself.

use faer::prelude::*;

use crate::backend::ComputeBackend;
use crate::error::{SylvesterError, SylvesterErrorKind};
use crate::operator::PreparedOperator;
use crate::workspace::SideWorkspace;

/// Performs one extended Krylov round on `side`, replacing its basis with an orthonormal
/// basis of `[basis | forward | inverse]` and rotating the iterate buffers.
///
/// # Errors
///
/// `DimensionMismatch` if the operator does not match the basis, or if the augmented
/// basis would exceed the workspace capacity.
pub fn extend_basis(
    backend: &dyn ComputeBackend,
    op: &PreparedOperator,
    side: &mut SideWorkspace,
) -> Result<(), SylvesterError> {
    check_operator(op, side)?;
    let (k, r) = (side.ncols, side.block);
    let width = k + 2 * r;
    if width > side.augmented.ncols() {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "augmented Krylov basis capacity",
            expected: side.augmented.ncols(),
            found: width,
        }
        .into());
    }

    backend.apply(
        op.operator(),
        side.forward.previous.as_ref().get(.., 0..r),
        side.forward.current.as_mut().get_mut(.., 0..r),
    )?;
    backend.solve(
        op.factorization(),
        side.inverse.previous.as_ref().get(.., 0..r),
        side.inverse.current.as_mut().get_mut(.., 0..r),
    );

    {
        let mut aug = side.augmented.as_mut();
        aug.rb_mut()
            .get_mut(.., 0..k)
            .copy_from(side.basis.as_ref().get(.., 0..k));
        aug.rb_mut()
            .get_mut(.., k..k + r)
            .copy_from(side.forward.current.as_ref().get(.., 0..r));
        aug.rb_mut()
            .get_mut(.., k + r..width)
            .copy_from(side.inverse.current.as_ref().get(.., 0..r));
    }

    let qr = side.augmented.as_ref().get(.., 0..width).qr();
    let q = backend.materialize_q(&qr)?;
    let ncols = q.ncols();
    if ncols > side.capacity() {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "Krylov basis capacity",
            expected: side.capacity(),
            found: ncols,
        }
        .into());
    }
    // The host copy feeds the next round's QR.
    let q = backend.to_host(&q)?;
    side.basis.as_mut().get_mut(.., 0..ncols).copy_from(q.as_ref());
    side.ncols = ncols;

    side.forward.rotate(r);
    side.inverse.rotate(r);
    Ok(())
}

/// Stores `A · basis` for the current basis in `side.applied`.
pub fn apply_to_basis(
    backend: &dyn ComputeBackend,
    op: &PreparedOperator,
    side: &mut SideWorkspace,
) -> Result<(), SylvesterError> {
    check_operator(op, side)?;
    let k = side.ncols;
    backend.apply(
        op.operator(),
        side.basis.as_ref().get(.., 0..k),
        side.applied.as_mut().get_mut(.., 0..k),
    )
}

fn check_operator(op: &PreparedOperator, side: &SideWorkspace) -> Result<(), SylvesterError> {
    if op.dim() != side.nrows() {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "operator vs. Krylov basis rows",
            expected: side.nrows(),
            found: op.dim(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::state::LowRankState;
    use crate::workspace::KrylovWorkspace;

    fn shifted_laplacian(n: usize) -> Mat<f64> {
        Mat::from_fn(n, n, |i, j| {
            if i == j {
                -3.0
            } else if i.abs_diff(j) == 1 {
                1.0
            } else {
                0.0
            }
        })
    }

    fn start_state(n: usize) -> LowRankState {
        let raw = Mat::<f64>::from_fn(n, 1, |i, _| 1.0 + (i as f64 * 0.37).sin());
        let u = raw.as_ref().qr().compute_thin_Q();
        LowRankState::new(u.clone(), Mat::from_fn(1, 1, |_, _| 1.0), u).unwrap()
    }

    #[test]
    fn test_basis_grows_and_stays_orthonormal() {
        let n = 30;
        let op = PreparedOperator::new("A1", shifted_laplacian(n)).unwrap();
        let mut ws = KrylovWorkspace::new(n, n, 1, 4);
        ws.reset(&start_state(n));

        for round in 1..=4 {
            extend_basis(&HostBackend, &op, &mut ws.left).unwrap();
            assert_eq!(ws.left().ncols(), 1 + 2 * round);

            let basis = ws.left().basis();
            let gram = basis.transpose() * basis;
            let defect = (&gram - &Mat::<f64>::identity(basis.ncols(), basis.ncols())).norm_l2();
            assert!(defect < 1e-12, "round {round}: {defect}");
        }
    }

    #[test]
    fn test_basis_contains_forward_and_inverse_images() {
        let n = 20;
        let a = shifted_laplacian(n);
        let op = PreparedOperator::new("A1", a.clone()).unwrap();
        let state = start_state(n);
        let mut ws = KrylovWorkspace::new(n, n, 1, 2);
        ws.reset(&state);
        extend_basis(&HostBackend, &op, &mut ws.left).unwrap();

        let basis = ws.left().basis();
        let forward = a.as_ref() * state.u();
        let inverse = a.as_ref().partial_piv_lu().solve(state.u());
        for block in [state.u().to_owned(), forward, inverse] {
            // Projection onto the basis leaves the block unchanged.
            let projected = basis * (basis.transpose() * block.as_ref());
            assert!((&projected - &block).norm_l2() < 1e-12 * block.norm_l2());
        }
    }

    #[test]
    fn test_iterates_are_rotated() {
        let n = 12;
        let a = shifted_laplacian(n);
        let op = PreparedOperator::new("A2", a.clone()).unwrap();
        let state = start_state(n);
        let mut ws = KrylovWorkspace::new(n, n, 1, 3);
        ws.reset(&state);
        extend_basis(&HostBackend, &op, &mut ws.right).unwrap();

        let expected = a.as_ref() * state.v();
        let previous = ws.right.forward.previous.as_ref().get(.., 0..1);
        assert!((&previous.to_owned() - &expected).norm_l2() < 1e-12);
    }

    #[test]
    fn test_basis_width_saturates_at_grid_size() {
        let n = 4;
        let op = PreparedOperator::new("A1", shifted_laplacian(n)).unwrap();
        let mut ws = KrylovWorkspace::new(n, n, 1, 5);
        ws.reset(&start_state(n));
        for _ in 0..5 {
            extend_basis(&HostBackend, &op, &mut ws.left).unwrap();
            assert!(ws.left().ncols() <= n);
        }
        assert_eq!(ws.left().ncols(), n);
    }

    #[test]
    fn test_capacity_overflow_is_an_error() {
        let n = 40;
        let op = PreparedOperator::new("A1", shifted_laplacian(n)).unwrap();
        let mut ws = KrylovWorkspace::new(n, n, 1, 1);
        ws.reset(&start_state(n));
        extend_basis(&HostBackend, &op, &mut ws.left).unwrap();
        let error = extend_basis(&HostBackend, &op, &mut ws.left).unwrap_err();
        assert!(matches!(
            error.kind(),
            SylvesterErrorKind::DimensionMismatch { .. }
        ));
    }

    #[test]
    fn test_operator_size_is_checked() {
        let op = PreparedOperator::new("A1", shifted_laplacian(5)).unwrap();
        let mut ws = KrylovWorkspace::new(6, 6, 1, 1);
        ws.reset(&start_state(6));
        let error = apply_to_basis(&HostBackend, &op, &mut ws.left).unwrap_err();
        assert_eq!(
            error.kind(),
            &SylvesterErrorKind::DimensionMismatch {
                context: "operator vs. Krylov basis rows",
                expected: 6,
                found: 5,
            }
        );
    }
}
