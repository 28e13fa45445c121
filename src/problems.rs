//! Model problems for the solver: the implicit time step of the 2D heat equation.
//!
//! On the rectangle `[0, lx] × [0, ly]` with homogeneous Dirichlet boundary values, the
//! heat equation `∂u/∂t = Δu` discretized by second-order finite differences on an
//! `nx × ny` interior grid reads `dX/dt = Lx X + X Ly^T`, where `Lx`, `Ly` are 1D
//! Laplacians. One backward Euler step of length `dt`,
//!
//! `X_new - X_old = dt (Lx X_new + X_new Ly^T)`,
//!
//! is rearranged into the Sylvester form the solver expects,
//!
//! `(dt Lx - I/2) X_new + X_new (dt Ly - I/2)^T + X_old = 0`,
//!
//! so `X_old = U_old S_old V_old^T` plays the role of the right-hand side. Both
//! coefficient operators are negative definite, hence the equation is always uniquely
//! solvable.

use faer::{
    prelude::*,
    sparse::{SparseColMat, Triplet},
};

use crate::{
    error::{SylvesterError, SylvesterErrorKind},
    operator::PreparedOperator,
    state::LowRankState,
};

/// Builds the scaled 1D Laplacian `shift · I + scale · tridiag(1, -2, 1) / h²` on `n`
/// interior points of an interval of length `length`, with `h = length / (n + 1)`.
fn shifted_laplacian(
    n: usize,
    length: f64,
    scale: f64,
    shift: f64,
) -> Result<SparseColMat<usize, f64>, SylvesterError> {
    let h = length / (n + 1) as f64;
    let off = scale / (h * h);
    let diag = shift - 2.0 * off;

    let mut triplets = Vec::with_capacity((3 * n).saturating_sub(2));
    for i in 0..n {
        triplets.push(Triplet {
            row: i,
            col: i,
            val: diag,
        });
        if i + 1 < n {
            triplets.push(Triplet {
                row: i,
                col: i + 1,
                val: off,
            });
            triplets.push(Triplet {
                row: i + 1,
                col: i,
                val: off,
            });
        }
    }
    SparseColMat::try_new_from_triplets(n, n, &triplets).map_err(|e| {
        SylvesterErrorKind::FactorizationFailed {
            operator: "Laplacian",
            reason: format!("{e:?}"),
        }
        .into()
    })
}

/// The 1D finite-difference Laplacian `tridiag(1, -2, 1) / h²` with Dirichlet boundary
/// values on `n` interior points of `[0, length]`.
pub fn laplacian_1d(n: usize, length: f64) -> Result<SparseColMat<usize, f64>, SylvesterError> {
    shifted_laplacian(n, length, 1.0, 0.0)
}

/// Interior grid nodes `(i + 1) h` of `[0, length]`.
pub fn grid_points(n: usize, length: f64) -> Vec<f64> {
    let h = length / (n + 1) as f64;
    (0..n).map(|i| (i + 1) as f64 * h).collect()
}

/// Parameters of one backward Euler step of the 2D heat equation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeatProblem {
    pub nx: usize,
    pub ny: usize,
    pub lx: f64,
    pub ly: f64,
    pub dt: f64,
}

impl HeatProblem {
    pub fn new(nx: usize, ny: usize, lx: f64, ly: f64, dt: f64) -> Result<Self, SylvesterError> {
        if nx == 0 || ny == 0 {
            return Err(SylvesterErrorKind::InvalidConfig(format!(
                "heat problem grid must be non-empty, got {nx}x{ny}"
            ))
            .into());
        }
        if !(lx > 0.0 && ly > 0.0 && lx.is_finite() && ly.is_finite()) {
            return Err(SylvesterErrorKind::InvalidConfig(format!(
                "domain lengths must be positive and finite, got {lx} and {ly}"
            ))
            .into());
        }
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(SylvesterErrorKind::InvalidConfig(format!(
                "time step must be positive and finite, got {dt}"
            ))
            .into());
        }
        Ok(Self { nx, ny, lx, ly, dt })
    }

    /// A square problem on the unit square.
    pub fn unit_square(n: usize, dt: f64) -> Result<Self, SylvesterError> {
        Self::new(n, n, 1.0, 1.0, dt)
    }

    /// `dt Lx - I/2`.
    pub fn a1(&self) -> Result<SparseColMat<usize, f64>, SylvesterError> {
        shifted_laplacian(self.nx, self.lx, self.dt, -0.5)
    }

    /// `dt Ly - I/2`.
    pub fn a2(&self) -> Result<SparseColMat<usize, f64>, SylvesterError> {
        shifted_laplacian(self.ny, self.ly, self.dt, -0.5)
    }

    /// Both step operators, prefactorized.
    pub fn operators(&self) -> Result<(PreparedOperator, PreparedOperator), SylvesterError> {
        let a1 = PreparedOperator::new("A1", self.a1()?)?;
        let a2 = PreparedOperator::new("A2", self.a2()?)?;
        Ok((a1, a2))
    }

    /// A smooth, anisotropic Gaussian bump rotated by 45 degrees, sampled on the interior
    /// grid. Its rotation makes the field genuinely low-rank but not rank one.
    pub fn initial_condition(&self) -> Mat<f64> {
        let xs = grid_points(self.nx, self.lx);
        let ys = grid_points(self.ny, self.ly);
        Mat::from_fn(self.nx, self.ny, |i, j| {
            let xi = xs[i] / self.lx;
            let eta = ys[j] / self.ly;
            let along = xi + eta - 1.0;
            let across = xi - eta;
            (-(along * along / 0.02 + across * across / 0.2)).exp()
        })
    }

    /// The initial condition compressed to a low-rank state.
    pub fn initial_state(&self, rel_tol: f64, max_rank: usize) -> Result<LowRankState, SylvesterError> {
        let x0 = self.initial_condition();
        LowRankState::from_dense(x0.as_ref(), rel_tol, max_rank)
    }
}
