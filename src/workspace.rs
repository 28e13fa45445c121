//! Preallocated scratch buffers for the extended Krylov iteration.
//!
//! Every buffer is sized once, from an upper bound on the basis width, and reused for
//! the whole solve (and for later solves with compatible dimensions). During iteration
//! only the tracked column counts change; nothing is reallocated.
//!
//! The bound comes from the growth of the augmented basis: each round appends one
//! forward and one inverse block of width `r`, so after `k` rounds the basis has at most
//! `r (1 + 2k)` columns, and never more than the grid dimension.

use faer::prelude::*;

use crate::state::LowRankState;

/// The last two iterates of one Krylov sequence (forward or inverse), stored in two
/// explicitly named slots.
#[derive(Clone, Debug)]
pub struct IterateBuffers {
    pub(crate) previous: Mat<f64>,
    pub(crate) current: Mat<f64>,
}

impl IterateBuffers {
    fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            previous: Mat::zeros(nrows, ncols),
            current: Mat::zeros(nrows, ncols),
        }
    }

    /// Loads the starting block into the `previous` slot.
    fn seed(&mut self, block: MatRef<'_, f64>) {
        let width = block.ncols();
        self.previous.as_mut().get_mut(.., 0..width).copy_from(block);
    }

    /// Makes the current iterate the previous one. This is a copy, so the two slots never
    /// alias.
    pub(crate) fn rotate(&mut self, width: usize) {
        self.previous
            .as_mut()
            .get_mut(.., 0..width)
            .copy_from(self.current.as_ref().get(.., 0..width));
    }
}

/// Buffers for one side (`U` with `A1`, or `V` with `A2`) of the equation.
#[derive(Clone, Debug)]
pub struct SideWorkspace {
    /// Orthonormal basis; the first `ncols` columns are valid.
    pub(crate) basis: Mat<f64>,
    pub(crate) ncols: usize,
    /// Width of the starting block (`r`), i.e. of every forward/inverse iterate.
    pub(crate) block: usize,
    /// `[basis | forward | inverse]` before orthogonalization.
    pub(crate) augmented: Mat<f64>,
    /// The operator applied to the current basis.
    pub(crate) applied: Mat<f64>,
    /// `[basis | applied]`, factorized by the convergence estimator.
    pub(crate) stacked: Mat<f64>,
    pub(crate) forward: IterateBuffers,
    pub(crate) inverse: IterateBuffers,
}

impl SideWorkspace {
    fn new(nrows: usize, max_block: usize, max_iter: usize) -> Self {
        let augmented_width = max_block * (1 + 2 * max_iter);
        let capacity = augmented_width.min(nrows);
        Self {
            basis: Mat::zeros(nrows, capacity),
            ncols: 0,
            block: 0,
            augmented: Mat::zeros(nrows, augmented_width.min(nrows + 2 * max_block)),
            applied: Mat::zeros(nrows, capacity),
            stacked: Mat::zeros(nrows, 2 * capacity),
            forward: IterateBuffers::new(nrows, max_block),
            inverse: IterateBuffers::new(nrows, max_block),
        }
    }

    fn seed(&mut self, start: MatRef<'_, f64>) {
        let r = start.ncols();
        self.basis.as_mut().get_mut(.., 0..r).copy_from(start);
        self.ncols = r;
        self.block = r;
        self.forward.seed(start);
        self.inverse.seed(start);
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.basis.nrows()
    }

    /// Maximum number of basis columns this side can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.basis.ncols()
    }

    /// Currently valid number of basis columns.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// View of the valid part of the orthonormal basis.
    #[inline]
    pub fn basis(&self) -> MatRef<'_, f64> {
        self.basis.as_ref().get(.., 0..self.ncols)
    }

    /// View of the operator applied to the valid part of the basis.
    #[inline]
    pub fn applied(&self) -> MatRef<'_, f64> {
        self.applied.as_ref().get(.., 0..self.ncols)
    }
}

/// Scratch state owned by one solver invocation at a time.
///
/// Concurrent solves must use separate workspaces; the `&mut` borrow taken by the solver
/// enforces this.
#[derive(Clone, Debug)]
pub struct KrylovWorkspace {
    pub(crate) left: SideWorkspace,
    pub(crate) right: SideWorkspace,
    /// Reduced core `S`; the leading `left.ncols × right.ncols` block is valid.
    pub(crate) core: Mat<f64>,
    max_block: usize,
    max_iter: usize,
}

impl KrylovWorkspace {
    /// Allocates buffers for an `nx × ny` grid, starting blocks of at most `max_block`
    /// columns, and at most `max_iter` enrichment rounds.
    pub fn new(nx: usize, ny: usize, max_block: usize, max_iter: usize) -> Self {
        let left = SideWorkspace::new(nx, max_block, max_iter);
        let right = SideWorkspace::new(ny, max_block, max_iter);
        let core = Mat::zeros(left.capacity(), right.capacity());
        log::debug!(
            "Allocated Krylov workspace for {}x{} grid (basis capacity {} / {}).",
            nx,
            ny,
            left.capacity(),
            right.capacity()
        );
        Self {
            left,
            right,
            core,
            max_block,
            max_iter,
        }
    }

    /// Whether this workspace can serve a solve with the given dimensions without
    /// reallocation.
    pub fn fits(&self, nx: usize, ny: usize, block: usize, max_iter: usize) -> bool {
        self.left.nrows() == nx
            && self.right.nrows() == ny
            && block <= self.max_block
            && max_iter <= self.max_iter
    }

    /// Re-seeds every buffer from the previous state: both bases start as `U_old`/`V_old`
    /// and every previous-iterate slot holds the same block.
    pub fn reset(&mut self, previous: &LowRankState) {
        self.left.seed(previous.u());
        self.right.seed(previous.v());
    }

    #[inline]
    pub fn left(&self) -> &SideWorkspace {
        &self.left
    }

    #[inline]
    pub fn right(&self) -> &SideWorkspace {
        &self.right
    }

    /// View of the valid part of the reduced core.
    #[inline]
    pub fn core(&self) -> MatRef<'_, f64> {
        self.core
            .as_ref()
            .get(0..self.left.ncols, 0..self.right.ncols)
    }

    /// Stores a freshly solved reduced core.
    pub(crate) fn store_core(&mut self, s: MatRef<'_, f64>) {
        self.core
            .as_mut()
            .get_mut(0..s.nrows(), 0..s.ncols())
            .copy_from(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orthonormal_block(n: usize, r: usize) -> Mat<f64> {
        let raw = Mat::<f64>::from_fn(n, r, |i, j| ((i + 1) as f64).powi(j as i32 % 3) + j as f64);
        raw.as_ref().qr().compute_thin_Q()
    }

    #[test]
    fn test_capacity_is_bounded_by_grid() {
        let ws = KrylovWorkspace::new(20, 200, 4, 10);
        assert_eq!(ws.left().capacity(), 20);
        assert_eq!(ws.right().capacity(), 4 * 21);
        assert_eq!(ws.left.augmented.ncols(), 28);
        assert_eq!(ws.right.augmented.ncols(), 84);
        assert_eq!((ws.core.nrows(), ws.core.ncols()), (20, 84));
    }

    #[test]
    fn test_reset_seeds_basis_and_iterates() {
        let u = orthonormal_block(12, 2);
        let v = orthonormal_block(9, 2);
        let s = Mat::<f64>::from_fn(2, 2, |i, j| if i == j { 2.0 - i as f64 } else { 0.0 });
        let state = LowRankState::new(u.clone(), s, v.clone()).unwrap();

        let mut ws = KrylovWorkspace::new(12, 9, 3, 4);
        ws.reset(&state);

        assert_eq!(ws.left().ncols(), 2);
        assert_eq!(ws.right().ncols(), 2);
        assert_eq!(ws.left().basis(), u.as_ref());
        assert_eq!(ws.left.forward.previous.as_ref().get(.., 0..2), u.as_ref());
        assert_eq!(ws.right.inverse.previous.as_ref().get(.., 0..2), v.as_ref());
    }

    #[test]
    fn test_rotate_copies_current_into_previous() {
        let mut buffers = IterateBuffers::new(4, 2);
        buffers.current = Mat::from_fn(4, 2, |i, j| (i * 2 + j) as f64);
        buffers.rotate(2);
        assert_eq!(buffers.previous, buffers.current);

        buffers.current[(0, 0)] = -1.0;
        assert_eq!(buffers.previous[(0, 0)], 0.0);
    }

    #[test]
    fn test_fits() {
        let ws = KrylovWorkspace::new(10, 8, 3, 5);
        assert!(ws.fits(10, 8, 3, 5));
        assert!(ws.fits(10, 8, 1, 2));
        assert!(!ws.fits(10, 8, 4, 5));
        assert!(!ws.fits(10, 8, 3, 6));
        assert!(!ws.fits(8, 10, 3, 5));
    }
}
