//! Execution backends for the extended Krylov solver.
//!
//! The solver never inspects the concrete type of the matrices it works on. Every
//! operation whose execution strategy differs between targets goes through the
//! [`ComputeBackend`] trait: operator application, inverse application through the
//! prefactorization, dense products, materialization of the orthogonal QR factor, and
//! moving matrices between device and host residency.
//!
//! The backend is chosen once, from a [`BackendKind`] configuration value:
//!
//! - [`BackendKind::Cpu`]: [`HostBackend`], sequential [`faer`] kernels on host memory.
//! - [`BackendKind::CpuParallel`]: [`ParallelHostBackend`], the same kernels on the rayon
//!   thread pool.
//! - [`BackendKind::Accelerator`]: `cuda::CudaBackend`, dense products with cuBLAS on
//!   device buffers. Only available with the `cuda` feature.
//! - [`BackendKind::AcceleratorUnified`]: `cuda::UnifiedCudaBackend`, which delegates to
//!   the plain CUDA path. Only available with the `cuda` feature.
//!
//! LU factorizations, QR factorizations and the reduced Schur solve always run on the
//! host. Device work is confined to dense products, whose operands and results live in
//! [`DeviceMatrix`] buffers until they are explicitly copied back with
//! [`ComputeBackend::to_host`].

use faer::{Accum, linalg::matmul::matmul, linalg::solvers::Qr, prelude::*};
use serde::{Deserialize, Serialize};

use crate::error::{SylvesterError, SylvesterErrorKind};
use crate::operator::{Factorization, Operator};

#[cfg(feature = "cuda")]
pub mod cuda;

/// Configuration tag selecting an execution backend.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Cpu,
    CpuParallel,
    Accelerator,
    AcceleratorUnified,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Cpu => "cpu",
            BackendKind::CpuParallel => "cpu-parallel",
            BackendKind::Accelerator => "accelerator",
            BackendKind::AcceleratorUnified => "accelerator-unified",
        }
    }

    /// Builds the backend instance this tag refers to.
    ///
    /// # Errors
    ///
    /// * `BackendUnavailable` for the accelerator kinds when the crate is built without
    ///   the `cuda` feature.
    /// * `Device` if the CUDA device or cuBLAS cannot be initialized.
    pub fn instantiate(self) -> Result<Box<dyn ComputeBackend>, SylvesterError> {
        match self {
            BackendKind::Cpu => Ok(Box::new(HostBackend)),
            BackendKind::CpuParallel => Ok(Box::new(ParallelHostBackend::default())),
            #[cfg(feature = "cuda")]
            BackendKind::Accelerator => Ok(Box::new(cuda::CudaBackend::new(0)?)),
            #[cfg(feature = "cuda")]
            BackendKind::AcceleratorUnified => Ok(Box::new(cuda::UnifiedCudaBackend::new(0)?)),
            #[cfg(not(feature = "cuda"))]
            BackendKind::Accelerator | BackendKind::AcceleratorUnified => {
                Err(SylvesterErrorKind::BackendUnavailable {
                    backend: self.name(),
                }
                .into())
            }
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A dense matrix in the residency of the backend that produced it.
pub enum DeviceMatrix {
    Host(Mat<f64>),
    #[cfg(feature = "cuda")]
    Cuda(cuda::CudaMatrix),
}

impl DeviceMatrix {
    pub fn nrows(&self) -> usize {
        match self {
            DeviceMatrix::Host(m) => m.nrows(),
            #[cfg(feature = "cuda")]
            DeviceMatrix::Cuda(m) => m.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            DeviceMatrix::Host(m) => m.ncols(),
            #[cfg(feature = "cuda")]
            DeviceMatrix::Cuda(m) => m.ncols(),
        }
    }

    /// The host view, or `ResidencyMismatch` if the data lives on a device.
    pub fn host(&self) -> Result<MatRef<'_, f64>, SylvesterError> {
        match self {
            DeviceMatrix::Host(m) => Ok(m.as_ref()),
            #[cfg(feature = "cuda")]
            DeviceMatrix::Cuda(_) => Err(SylvesterErrorKind::ResidencyMismatch {
                expected: "host",
                found: "cuda",
            }
            .into()),
        }
    }
}

impl std::fmt::Debug for DeviceMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let residency = match self {
            DeviceMatrix::Host(_) => "host",
            #[cfg(feature = "cuda")]
            DeviceMatrix::Cuda(_) => "cuda",
        };
        write!(f, "DeviceMatrix::{residency}({}x{})", self.nrows(), self.ncols())
    }
}

fn check_inner_dims(lhs: &DeviceMatrix, rhs: &DeviceMatrix) -> Result<(), SylvesterError> {
    if lhs.ncols() != rhs.nrows() {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "inner dimensions of a resident product",
            expected: lhs.ncols(),
            found: rhs.nrows(),
        }
        .into());
    }
    Ok(())
}

/// The operations the solver delegates to its execution target.
///
/// The provided methods implement host execution with [`ComputeBackend::par`]; device
/// backends override the ones they accelerate.
pub trait ComputeBackend: Send + Sync {
    /// The configuration tag this backend was built from.
    fn kind(&self) -> BackendKind;

    /// Parallelism used for the host-side dense and sparse kernels.
    fn par(&self) -> Par;

    /// `dst = A · rhs`.
    fn apply(
        &self,
        op: &Operator,
        rhs: MatRef<'_, f64>,
        dst: MatMut<'_, f64>,
    ) -> Result<(), SylvesterError> {
        op.apply_into(dst, rhs, self.par());
        Ok(())
    }

    /// `dst = A \ rhs`, through the prefactorization of `A`. Always runs on the host.
    fn solve(&self, factor: &Factorization, rhs: MatRef<'_, f64>, dst: MatMut<'_, f64>) {
        factor.solve_into(dst, rhs);
    }

    /// `dst = lhs · rhs` for host operands.
    fn matmul(
        &self,
        dst: MatMut<'_, f64>,
        lhs: MatRef<'_, f64>,
        rhs: MatRef<'_, f64>,
    ) -> Result<(), SylvesterError> {
        matmul(dst, Accum::Replace, lhs, rhs, 1.0, self.par());
        Ok(())
    }

    /// `lhs · rhs` for operands already in backend residency. The result stays resident.
    fn product(
        &self,
        lhs: &DeviceMatrix,
        rhs: &DeviceMatrix,
    ) -> Result<DeviceMatrix, SylvesterError> {
        check_inner_dims(lhs, rhs)?;
        let (a, b) = (lhs.host()?, rhs.host()?);
        let mut out = Mat::<f64>::zeros(a.nrows(), b.ncols());
        matmul(out.as_mut(), Accum::Replace, a, b, 1.0, self.par());
        Ok(DeviceMatrix::Host(out))
    }

    /// Turns the implicit Householder representation of a thin QR factor into an explicit
    /// dense matrix with the residency this backend computes on.
    fn materialize_q(&self, qr: &Qr<f64>) -> Result<DeviceMatrix, SylvesterError> {
        Ok(DeviceMatrix::Host(qr.compute_thin_Q()))
    }

    /// Copies a host matrix into backend residency.
    fn to_device(&self, m: MatRef<'_, f64>) -> Result<DeviceMatrix, SylvesterError> {
        Ok(DeviceMatrix::Host(m.to_owned()))
    }

    /// Copies a resident matrix into host memory.
    fn to_host(&self, m: &DeviceMatrix) -> Result<Mat<f64>, SylvesterError> {
        Ok(m.host()?.to_owned())
    }

    /// Blocks until all previously issued work has completed.
    ///
    /// Must be called before a device-side reduction is used in a host-side decision.
    fn synchronize(&self) -> Result<(), SylvesterError> {
        Ok(())
    }
}

/// Sequential host execution.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostBackend;

impl ComputeBackend for HostBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn par(&self) -> Par {
        Par::Seq
    }
}

/// Multi-threaded host execution on the rayon pool.
///
/// `threads == 0` uses every thread of the global pool.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParallelHostBackend {
    pub threads: usize,
}

impl ComputeBackend for ParallelHostBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CpuParallel
    }

    fn par(&self) -> Par {
        Par::rayon(self.threads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Mat<f64> {
        Mat::from_fn(7, 3, |i, j| ((i * 3 + j) as f64).sin() + if i == j { 2.0 } else { 0.0 })
    }

    fn host_backends() -> [Box<dyn ComputeBackend>; 2] {
        [Box::new(HostBackend), Box::new(ParallelHostBackend::default())]
    }

    #[test]
    fn test_instantiate_matches_kind() {
        for kind in [BackendKind::Cpu, BackendKind::CpuParallel] {
            assert_eq!(kind.instantiate().unwrap().kind(), kind);
        }
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_accelerators_need_the_cuda_feature() {
        for kind in [BackendKind::Accelerator, BackendKind::AcceleratorUnified] {
            let error = kind.instantiate().err().unwrap();
            assert_eq!(
                error.kind(),
                &SylvesterErrorKind::BackendUnavailable {
                    backend: kind.name()
                }
            );
        }
    }

    #[test]
    fn test_materialized_q_is_orthonormal_on_host_backends() {
        let block = sample_block();
        let qr = block.as_ref().qr();
        for backend in host_backends() {
            let q = backend.to_host(&backend.materialize_q(&qr).unwrap()).unwrap();
            assert_eq!((q.nrows(), q.ncols()), (7, 3));
            let gram = q.as_ref().transpose() * q.as_ref();
            let defect = &gram - &Mat::<f64>::identity(3, 3);
            assert!(defect.norm_l2() < 1e-13, "{}: {}", backend.kind(), defect.norm_l2());
        }
    }

    #[test]
    fn test_resident_product_matches_matmul() {
        let lhs = sample_block();
        let rhs = Mat::<f64>::from_fn(3, 4, |i, j| (i as f64) - (j as f64) * 0.5);
        let expected = lhs.as_ref() * rhs.as_ref();
        for backend in host_backends() {
            let mut direct = Mat::<f64>::zeros(7, 4);
            backend
                .matmul(direct.as_mut(), lhs.as_ref(), rhs.as_ref())
                .unwrap();
            assert!((&direct - &expected).norm_l2() < 1e-13);

            let resident = backend
                .product(
                    &backend.to_device(lhs.as_ref()).unwrap(),
                    &backend.to_device(rhs.as_ref()).unwrap(),
                )
                .unwrap();
            assert_eq!((resident.nrows(), resident.ncols()), (7, 4));
            let back = backend.to_host(&resident).unwrap();
            assert!((&back - &expected).norm_l2() < 1e-13);
        }
    }

    #[test]
    fn test_resident_product_rejects_mismatched_operands() {
        let lhs = HostBackend.to_device(sample_block().as_ref()).unwrap();
        let error = HostBackend.product(&lhs, &lhs).unwrap_err();
        assert!(matches!(
            error.kind(),
            SylvesterErrorKind::DimensionMismatch { expected: 3, found: 7, .. }
        ));
    }

    #[test]
    fn test_transposed_views_are_packed() {
        let block = sample_block();
        let resident = HostBackend.to_device(block.as_ref().transpose()).unwrap();
        assert_eq!((resident.nrows(), resident.ncols()), (3, 7));
        let back = HostBackend.to_host(&resident).unwrap();
        assert_eq!(back[(2, 5)], block[(5, 2)]);
    }

    #[test]
    fn test_display_is_kebab_case() {
        assert_eq!(BackendKind::AcceleratorUnified.to_string(), "accelerator-unified");
        assert_eq!(BackendKind::CpuParallel.to_string(), "cpu-parallel");
        assert_eq!(BackendKind::default(), BackendKind::Cpu);
    }
}
