//! CUDA execution through [`cudarc`].
//!
//! Matrices are packed column-major into [`CudaSlice`] buffers, which is the layout cuBLAS
//! expects, so products need no transposition flags. All work is issued on the default
//! stream of the device context and ordered by it; host code only observes results after
//! an explicit download or [`ComputeBackend::synchronize`].

use std::sync::Arc;

use cudarc::cublas::{CudaBlas, Gemm, GemmConfig, sys::cublasOperation_t};
use cudarc::driver::{CudaContext, CudaSlice, CudaStream};
use faer::{linalg::solvers::Qr, prelude::*};

use super::{BackendKind, ComputeBackend, DeviceMatrix, check_inner_dims};
use crate::error::{SylvesterError, SylvesterErrorKind};
use crate::operator::Operator;

fn device_error(context: &str, e: impl std::fmt::Debug) -> SylvesterError {
    SylvesterErrorKind::Device(format!("{context}: {e:?}")).into()
}

/// A dense column-major matrix in device memory.
pub struct CudaMatrix {
    data: CudaSlice<f64>,
    nrows: usize,
    ncols: usize,
}

impl CudaMatrix {
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }
}

/// cuBLAS products on one CUDA device.
pub struct CudaBackend {
    context: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    blas: CudaBlas,
}

impl CudaBackend {
    /// Opens device `ordinal` and creates a cuBLAS handle bound to its default stream.
    pub fn new(ordinal: usize) -> Result<Self, SylvesterError> {
        let context = CudaContext::new(ordinal)
            .map_err(|e| device_error("failed to open CUDA device", e))?;
        let stream = context.default_stream();
        let blas = CudaBlas::new(stream.clone())
            .map_err(|e| device_error("failed to initialize cuBLAS", e))?;
        log::info!("Using CUDA device {}.", ordinal);
        Ok(Self {
            context,
            stream,
            blas,
        })
    }

    pub fn ordinal(&self) -> usize {
        self.context.ordinal()
    }

    fn upload(&self, m: MatRef<'_, f64>) -> Result<CudaMatrix, SylvesterError> {
        let (nrows, ncols) = (m.nrows(), m.ncols());
        log::trace!("upload {}x{} block to device", nrows, ncols);
        let mut packed = Vec::with_capacity(nrows * ncols);
        for j in 0..ncols {
            for i in 0..nrows {
                packed.push(m[(i, j)]);
            }
        }
        // Zero-sized device allocations are rejected by the driver.
        let data = if packed.is_empty() {
            self.stream.alloc_zeros::<f64>(1)
        } else {
            self.stream.memcpy_stod(&packed)
        }
        .map_err(|e| device_error("host-to-device copy failed", e))?;
        Ok(CudaMatrix { data, nrows, ncols })
    }

    fn download(&self, m: &CudaMatrix) -> Result<Mat<f64>, SylvesterError> {
        log::trace!("download {}x{} block to host", m.nrows, m.ncols);
        if m.nrows == 0 || m.ncols == 0 {
            return Ok(Mat::zeros(m.nrows, m.ncols));
        }
        let packed = self
            .stream
            .memcpy_dtov(&m.data)
            .map_err(|e| device_error("device-to-host copy failed", e))?;
        Ok(Mat::from_fn(m.nrows, m.ncols, |i, j| packed[i + j * m.nrows]))
    }

    fn gemm(&self, lhs: &CudaMatrix, rhs: &CudaMatrix) -> Result<CudaMatrix, SylvesterError> {
        let (m, k, n) = (lhs.nrows, lhs.ncols, rhs.ncols);
        let mut data = self
            .stream
            .alloc_zeros::<f64>((m * n).max(1))
            .map_err(|e| device_error("device allocation failed", e))?;
        if m > 0 && n > 0 && k > 0 {
            let cfg = GemmConfig {
                transa: cublasOperation_t::CUBLAS_OP_N,
                transb: cublasOperation_t::CUBLAS_OP_N,
                m: m as i32,
                n: n as i32,
                k: k as i32,
                alpha: 1.0f64,
                lda: m as i32,
                ldb: k as i32,
                beta: 0.0f64,
                ldc: m as i32,
            };
            // SAFETY: the buffers hold column-major m×k, k×n and m×n matrices whose leading
            // dimensions are their row counts, matching `cfg`.
            unsafe { self.blas.gemm(cfg, &lhs.data, &rhs.data, &mut data) }
                .map_err(|e| device_error("cuBLAS dgemm failed", e))?;
        }
        Ok(CudaMatrix {
            data,
            nrows: m,
            ncols: n,
        })
    }

    fn resident<'a>(&self, m: &'a DeviceMatrix) -> Result<&'a CudaMatrix, SylvesterError> {
        match m {
            DeviceMatrix::Cuda(c) => Ok(c),
            DeviceMatrix::Host(_) => Err(SylvesterErrorKind::ResidencyMismatch {
                expected: "cuda",
                found: "host",
            }
            .into()),
        }
    }
}

impl ComputeBackend for CudaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Accelerator
    }

    // Sparse products and the LU solves stay on the host.
    fn par(&self) -> Par {
        Par::rayon(0)
    }

    fn apply(
        &self,
        op: &Operator,
        rhs: MatRef<'_, f64>,
        dst: MatMut<'_, f64>,
    ) -> Result<(), SylvesterError> {
        match op {
            Operator::Dense(a) => self.matmul(dst, a.as_ref(), rhs),
            Operator::Sparse(_) => {
                op.apply_into(dst, rhs, self.par());
                Ok(())
            }
        }
    }

    fn matmul(
        &self,
        mut dst: MatMut<'_, f64>,
        lhs: MatRef<'_, f64>,
        rhs: MatRef<'_, f64>,
    ) -> Result<(), SylvesterError> {
        let product = self.gemm(&self.upload(lhs)?, &self.upload(rhs)?)?;
        dst.copy_from(self.download(&product)?.as_ref());
        Ok(())
    }

    fn product(
        &self,
        lhs: &DeviceMatrix,
        rhs: &DeviceMatrix,
    ) -> Result<DeviceMatrix, SylvesterError> {
        check_inner_dims(lhs, rhs)?;
        Ok(DeviceMatrix::Cuda(
            self.gemm(self.resident(lhs)?, self.resident(rhs)?)?,
        ))
    }

    // TODO: build Q on the device with cuSOLVER `orgqr` once the QR itself moves there.
    fn materialize_q(&self, qr: &Qr<f64>) -> Result<DeviceMatrix, SylvesterError> {
        let q = qr.compute_thin_Q();
        self.to_device(q.as_ref())
    }

    fn to_device(&self, m: MatRef<'_, f64>) -> Result<DeviceMatrix, SylvesterError> {
        Ok(DeviceMatrix::Cuda(self.upload(m)?))
    }

    fn to_host(&self, m: &DeviceMatrix) -> Result<Mat<f64>, SylvesterError> {
        match m {
            DeviceMatrix::Cuda(c) => self.download(c),
            DeviceMatrix::Host(h) => Ok(h.clone()),
        }
    }

    fn synchronize(&self) -> Result<(), SylvesterError> {
        self.stream
            .synchronize()
            .map_err(|e| device_error("stream synchronization failed", e))
    }
}

/// CUDA execution over unified memory. Every operation delegates to [`CudaBackend`].
pub struct UnifiedCudaBackend {
    inner: CudaBackend,
}

impl UnifiedCudaBackend {
    pub fn new(ordinal: usize) -> Result<Self, SylvesterError> {
        Ok(Self {
            inner: CudaBackend::new(ordinal)?,
        })
    }
}

impl ComputeBackend for UnifiedCudaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::AcceleratorUnified
    }

    fn par(&self) -> Par {
        self.inner.par()
    }

    fn apply(
        &self,
        op: &Operator,
        rhs: MatRef<'_, f64>,
        dst: MatMut<'_, f64>,
    ) -> Result<(), SylvesterError> {
        self.inner.apply(op, rhs, dst)
    }

    fn matmul(
        &self,
        dst: MatMut<'_, f64>,
        lhs: MatRef<'_, f64>,
        rhs: MatRef<'_, f64>,
    ) -> Result<(), SylvesterError> {
        self.inner.matmul(dst, lhs, rhs)
    }

    fn product(
        &self,
        lhs: &DeviceMatrix,
        rhs: &DeviceMatrix,
    ) -> Result<DeviceMatrix, SylvesterError> {
        self.inner.product(lhs, rhs)
    }

    fn materialize_q(&self, qr: &Qr<f64>) -> Result<DeviceMatrix, SylvesterError> {
        self.inner.materialize_q(qr)
    }

    fn to_device(&self, m: MatRef<'_, f64>) -> Result<DeviceMatrix, SylvesterError> {
        self.inner.to_device(m)
    }

    fn to_host(&self, m: &DeviceMatrix) -> Result<Mat<f64>, SylvesterError> {
        self.inner.to_host(m)
    }

    fn synchronize(&self) -> Result<(), SylvesterError> {
        self.inner.synchronize()
    }
}
