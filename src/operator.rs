//! Coefficient operators `A1`, `A2` and their LU prefactorizations.
//!
//! The extended Krylov method needs exactly two things from an operator: its action on a
//! block of vectors (`A · X`) and the action of its inverse (`A \ X`). The first is
//! delegated to [`faer`]'s dense product or to its matrix-free [`LinOp`] implementation for
//! sparse matrices; the second goes through an LU factorization computed once per solve
//! and shared read-only by every iteration.
//!
//! A [`PreparedOperator`] bundles both. Constructing it is the only place where a singular
//! operator is detected; the solver has no fallback for that case.

use crate::error::{SylvesterError, SylvesterErrorKind};
use faer::{
    Accum,
    dyn_stack::{MemBuffer, MemStack},
    linalg::{matmul::matmul, solvers::PartialPivLu},
    matrix_free::LinOp,
    prelude::*,
    sparse::{SparseColMat, linalg::solvers::Lu},
};

/// Upper bound on the condition-number lower estimate `‖A‖ ‖x‖ / ‖b‖` obtained from the
/// factorization probe. Anything larger is reported as singular.
const CONDITION_LIMIT: f64 = 1.0 / (100.0 * f64::EPSILON);

/// A square coefficient operator stored either densely or in compressed sparse columns.
#[derive(Clone, Debug)]
pub enum Operator {
    Dense(Mat<f64>),
    Sparse(SparseColMat<usize, f64>),
}

impl Operator {
    #[inline]
    pub fn nrows(&self) -> usize {
        match self {
            Operator::Dense(a) => a.nrows(),
            Operator::Sparse(a) => a.nrows(),
        }
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        match self {
            Operator::Dense(a) => a.ncols(),
            Operator::Sparse(a) => a.ncols(),
        }
    }

    /// Writes `A · rhs` into `dst`, overwriting it.
    ///
    /// # Panics
    ///
    /// Panics if `rhs` does not have `ncols()` rows or `dst` does not match the product shape.
    pub fn apply_into(&self, dst: MatMut<'_, f64>, rhs: MatRef<'_, f64>, par: Par) {
        assert_eq!(
            self.ncols(),
            rhs.nrows(),
            "Dimension mismatch: operator columns ({}) do not match block rows ({}).",
            self.ncols(),
            rhs.nrows(),
        );
        match self {
            Operator::Dense(a) => matmul(dst, Accum::Replace, a.as_ref(), rhs, 1.0, par),
            Operator::Sparse(a) => {
                let a = a.as_ref();
                let mut mem = MemBuffer::new(a.apply_scratch(rhs.ncols(), par));
                LinOp::apply(&a, dst, rhs, par, MemStack::new(&mut mem));
            }
        }
    }

    /// Returns `A · rhs` as an owned matrix.
    pub fn apply(&self, rhs: MatRef<'_, f64>, par: Par) -> Mat<f64> {
        let mut out = Mat::zeros(self.nrows(), rhs.ncols());
        self.apply_into(out.as_mut(), rhs, par);
        out
    }

    /// Frobenius norm of the stored entries.
    pub fn norm_l2(&self) -> f64 {
        match self {
            Operator::Dense(a) => a.norm_l2(),
            Operator::Sparse(a) => a
                .triplet_iter()
                .map(|t| t.val * t.val)
                .sum::<f64>()
                .sqrt(),
        }
    }

    /// Materializes the operator as a dense matrix. Intended for diagnostics and tests.
    pub fn to_dense(&self) -> Mat<f64> {
        match self {
            Operator::Dense(a) => a.clone(),
            Operator::Sparse(a) => {
                let mut dense = Mat::zeros(a.nrows(), a.ncols());
                for t in a.triplet_iter() {
                    dense[(t.row, t.col)] += *t.val;
                }
                dense
            }
        }
    }
}

impl From<Mat<f64>> for Operator {
    fn from(a: Mat<f64>) -> Self {
        Operator::Dense(a)
    }
}

impl From<SparseColMat<usize, f64>> for Operator {
    fn from(a: SparseColMat<usize, f64>) -> Self {
        Operator::Sparse(a)
    }
}

/// LU factorization of an [`Operator`], used for the inverse-operator application.
pub enum Factorization {
    Dense(PartialPivLu<f64>),
    Sparse(Lu<usize, f64>),
}

impl Factorization {
    /// Writes `A \ rhs` into `dst`, overwriting it.
    pub fn solve_into(&self, mut dst: MatMut<'_, f64>, rhs: MatRef<'_, f64>) {
        let x = match self {
            Factorization::Dense(lu) => lu.solve(rhs),
            Factorization::Sparse(lu) => lu.solve(rhs),
        };
        dst.copy_from(x.as_ref());
    }
}

impl std::fmt::Debug for Factorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Factorization::Dense(_) => f.write_str("Factorization::Dense(PartialPivLu)"),
            Factorization::Sparse(_) => f.write_str("Factorization::Sparse(Lu)"),
        }
    }
}

/// An operator together with its prefactorization, fixed for the duration of a solve.
#[derive(Debug)]
pub struct PreparedOperator {
    name: &'static str,
    operator: Operator,
    factorization: Factorization,
}

impl PreparedOperator {
    /// Factorizes `operator` and checks that the factorization is usable.
    ///
    /// `name` is only used in error messages and logs (e.g. `"A1"`).
    ///
    /// # Errors
    ///
    /// * `DimensionMismatch` if the operator is not square.
    /// * `FactorizationFailed` if the sparse LU routine rejects the matrix.
    /// * `SingularOperator` if a probe solve with the factorization is not finite or
    ///   reveals a condition number beyond `1 / (100 ε)`.
    pub fn new(name: &'static str, operator: impl Into<Operator>) -> Result<Self, SylvesterError> {
        let operator = operator.into();
        if operator.nrows() != operator.ncols() {
            return Err(SylvesterErrorKind::DimensionMismatch {
                context: "square coefficient operator",
                expected: operator.nrows(),
                found: operator.ncols(),
            }
            .into());
        }

        let factorization = match &operator {
            Operator::Dense(a) => Factorization::Dense(a.partial_piv_lu()),
            Operator::Sparse(a) => Factorization::Sparse(a.as_ref().sp_lu().map_err(|e| {
                SylvesterErrorKind::FactorizationFailed {
                    operator: name,
                    reason: format!("{e:?}"),
                }
            })?),
        };

        let prepared = Self {
            name,
            operator,
            factorization,
        };
        prepared.probe()?;
        log::debug!(
            "Prefactorized operator {} ({}x{}).",
            name,
            prepared.dim(),
            prepared.dim()
        );
        Ok(prepared)
    }

    /// Solves `A x = 1` and rejects the factorization if the result is not finite or
    /// implies an extreme condition number.
    fn probe(&self) -> Result<(), SylvesterError> {
        let n = self.dim();
        if n == 0 {
            return Ok(());
        }
        let b = Mat::<f64>::from_fn(n, 1, |_, _| 1.0);
        let mut x = Mat::<f64>::zeros(n, 1);
        self.factorization.solve_into(x.as_mut(), b.as_ref());

        let x_norm = x.norm_l2();
        let estimate = self.operator.norm_l2() * x_norm / b.norm_l2();
        if !x_norm.is_finite() || !(estimate <= CONDITION_LIMIT) {
            return Err(SylvesterErrorKind::SingularOperator {
                operator: self.name,
            }
            .into());
        }
        Ok(())
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.operator.nrows()
    }

    #[inline]
    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    #[inline]
    pub fn factorization(&self) -> &Factorization {
        &self.factorization
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::{mat, sparse::Triplet};

    fn tridiagonal(n: usize) -> SparseColMat<usize, f64> {
        let mut triplets = Vec::with_capacity(3 * n);
        for i in 0..n {
            triplets.push(Triplet {
                row: i,
                col: i,
                val: -2.0,
            });
            if i + 1 < n {
                triplets.push(Triplet {
                    row: i,
                    col: i + 1,
                    val: 1.0,
                });
                triplets.push(Triplet {
                    row: i + 1,
                    col: i,
                    val: 1.0,
                });
            }
        }
        SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap()
    }

    #[test]
    fn test_dense_and_sparse_apply_agree() {
        let sparse = Operator::from(tridiagonal(5));
        let dense = Operator::from(sparse.to_dense());
        let block = Mat::<f64>::from_fn(5, 2, |i, j| (i + 2 * j) as f64);

        let expected = dense.apply(block.as_ref(), Par::Seq);
        let result = sparse.apply(block.as_ref(), Par::Seq);
        assert!((&result - &expected).norm_l2() < 1e-14);
        assert_eq!(expected[(0, 0)], 1.0);
    }

    #[test]
    fn test_prepared_operator_inverts() {
        let prepared = PreparedOperator::new("A1", tridiagonal(6)).unwrap();
        let rhs = Mat::<f64>::from_fn(6, 3, |i, j| ((i + 1) * (j + 1)) as f64);
        let mut x = Mat::<f64>::zeros(6, 3);
        prepared.factorization().solve_into(x.as_mut(), rhs.as_ref());

        let back = prepared.operator().apply(x.as_ref(), Par::Seq);
        assert!((&back - &rhs).norm_l2() < 1e-12);
    }

    #[test]
    fn test_singular_dense_operator_is_rejected() {
        let a: Mat<f64> = mat![[1.0, 2.0], [2.0, 4.0]];
        let error = PreparedOperator::new("A2", a).unwrap_err();
        assert_eq!(
            error.kind(),
            &SylvesterErrorKind::SingularOperator { operator: "A2" }
        );
    }

    #[test]
    fn test_non_square_operator_is_rejected() {
        let a = Mat::<f64>::zeros(3, 2);
        let error = PreparedOperator::new("A1", a).unwrap_err();
        assert!(matches!(
            error.kind(),
            SylvesterErrorKind::DimensionMismatch { .. }
        ));
    }

    #[test]
    #[should_panic(expected = "Dimension mismatch: operator columns (2) do not match block rows (3).")]
    fn test_apply_dimension_mismatch_panics() {
        let a: Mat<f64> = mat![[1.0, 0.0], [0.0, 1.0]];
        let block: Mat<f64> = mat![[1.0], [2.0], [3.0]];
        Operator::from(a).apply(block.as_ref(), Par::Seq);
    }
}
