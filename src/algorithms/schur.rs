//! Real Schur decomposition of small dense matrices.
//!
//! Computes `A = Q T Q^T` with `Q` orthogonal and `T` upper quasi-triangular: its
//! diagonal consists of 1×1 blocks (real eigenvalues) and 2×2 blocks (complex conjugate
//! eigenvalue pairs). The reduced Sylvester solver needs this form for both projected
//! coefficient matrices.
//!
//! The algorithm is the classical two-phase one:
//!
//! 1. Householder reduction to upper Hessenberg form, accumulating the reflectors.
//! 2. Francis double-shift QR iteration on the Hessenberg matrix, deflating from the
//!    bottom right corner, with exceptional shifts after 10 and 30 stagnating sweeps.
//!
//! The matrices involved are at most a few hundred rows wide, so the implementation works
//! directly on element indices and favors clarity over blocking.

use faer::prelude::*;

use crate::error::{SylvesterError, SylvesterErrorKind};

/// Sweeps allowed for a single deflation before giving up.
const MAX_SWEEPS: usize = 100;

/// The factors of a real Schur decomposition `A = Q T Q^T`.
#[derive(Clone, Debug)]
pub struct RealSchur {
    pub q: Mat<f64>,
    pub t: Mat<f64>,
}

/// Computes the real Schur decomposition of the square matrix `a`.
///
/// Subdiagonal entries of `T` that do not belong to a 2×2 block are exactly zero, so
/// [`block_size`] can be used to walk the diagonal blocks.
///
/// # Errors
///
/// * `DimensionMismatch` if `a` is not square.
/// * `SchurNoConvergence` if a deflation needs more than 100 QR sweeps.
pub fn real_schur(a: MatRef<'_, f64>) -> Result<RealSchur, SylvesterError> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "square matrix for real Schur form",
            expected: n,
            found: a.ncols(),
        }
        .into());
    }

    let mut t = a.to_owned();
    let mut q = Mat::<f64>::identity(n, n);
    if n > 2 {
        hessenberg(&mut t, &mut q);
    }
    francis_qr(&mut t, &mut q)?;

    for j in 0..n {
        for i in j + 2..n {
            t[(i, j)] = 0.0;
        }
    }
    Ok(RealSchur { q, t })
}

/// Size (1 or 2) of the diagonal block of a quasi-triangular `t` that starts at `j`.
#[inline]
pub fn block_size(t: MatRef<'_, f64>, j: usize) -> usize {
    if j + 1 < t.nrows() && t[(j + 1, j)] != 0.0 {
        2
    } else {
        1
    }
}

/// Householder reduction to upper Hessenberg form. On return `h` is Hessenberg (entries
/// below the first subdiagonal are cleared) and `v` holds the accumulated similarity.
fn hessenberg(h: &mut Mat<f64>, v: &mut Mat<f64>) {
    let n = h.nrows();
    let high = n - 1;
    let mut ort = vec![0.0; n];

    for m in 1..high {
        let scale: f64 = (m..=high).map(|i| h[(i, m - 1)].abs()).sum();
        if scale == 0.0 {
            continue;
        }

        let mut norm_sq = 0.0;
        for i in (m..=high).rev() {
            ort[i] = h[(i, m - 1)] / scale;
            norm_sq += ort[i] * ort[i];
        }
        let mut g = norm_sq.sqrt();
        if ort[m] > 0.0 {
            g = -g;
        }
        norm_sq -= ort[m] * g;
        ort[m] -= g;

        // H = (I - u u^T / |u|^2) H (I - u u^T / |u|^2)
        for j in m..n {
            let f = (m..=high).map(|i| ort[i] * h[(i, j)]).sum::<f64>() / norm_sq;
            for i in m..=high {
                h[(i, j)] -= f * ort[i];
            }
        }
        for i in 0..=high {
            let f = (m..=high).map(|j| ort[j] * h[(i, j)]).sum::<f64>() / norm_sq;
            for j in m..=high {
                h[(i, j)] -= f * ort[j];
            }
        }
        ort[m] *= scale;
        h[(m, m - 1)] = scale * g;
    }

    for m in (1..high).rev() {
        if h[(m, m - 1)] == 0.0 {
            continue;
        }
        for i in m + 1..=high {
            ort[i] = h[(i, m - 1)];
        }
        for j in m..=high {
            let g = (m..=high).map(|i| ort[i] * v[(i, j)]).sum::<f64>();
            // Two divisions to avoid underflow.
            let g = (g / ort[m]) / h[(m, m - 1)];
            for i in m..=high {
                v[(i, j)] += g * ort[i];
            }
        }
    }

    for j in 0..n {
        for i in j + 2..n {
            h[(i, j)] = 0.0;
        }
    }
}

/// Francis double-shift QR iteration on an upper Hessenberg `h`, accumulating the
/// orthogonal transformations into `v`.
fn francis_qr(h: &mut Mat<f64>, v: &mut Mat<f64>) -> Result<(), SylvesterError> {
    let nn = h.nrows();
    let eps = f64::EPSILON;
    let mut exshift = 0.0;

    let mut norm = 0.0;
    for i in 0..nn {
        for j in i.saturating_sub(1)..nn {
            norm += h[(i, j)].abs();
        }
    }

    // Rows `0..end` are still active.
    let mut end = nn;
    let mut iter = 0;
    while end > 0 {
        let n = end - 1;

        // Look for a single small subdiagonal element.
        let mut l = n;
        while l > 0 {
            let mut s = h[(l - 1, l - 1)].abs() + h[(l, l)].abs();
            if s == 0.0 {
                s = norm;
            }
            if h[(l, l - 1)].abs() <= eps * s {
                h[(l, l - 1)] = 0.0;
                break;
            }
            l -= 1;
        }

        if l == n {
            // One real root.
            h[(n, n)] += exshift;
            end -= 1;
            iter = 0;
        } else if l + 1 == n {
            // Two roots: split a real pair into 1×1 blocks, keep a complex pair as is.
            let w = h[(n, n - 1)] * h[(n - 1, n)];
            let p = (h[(n - 1, n - 1)] - h[(n, n)]) * 0.5;
            let q = p * p + w;
            h[(n, n)] += exshift;
            h[(n - 1, n - 1)] += exshift;

            if q >= 0.0 {
                let z = q.sqrt();
                let z = if p >= 0.0 { p + z } else { p - z };
                let x = h[(n, n - 1)];
                let s = x.abs() + z.abs();
                let (p, q) = (x / s, z / s);
                let r = (p * p + q * q).sqrt();
                let (p, q) = (p / r, q / r);

                for j in n - 1..nn {
                    let z = h[(n - 1, j)];
                    h[(n - 1, j)] = q * z + p * h[(n, j)];
                    h[(n, j)] = q * h[(n, j)] - p * z;
                }
                for i in 0..=n {
                    let z = h[(i, n - 1)];
                    h[(i, n - 1)] = q * z + p * h[(i, n)];
                    h[(i, n)] = q * h[(i, n)] - p * z;
                }
                for i in 0..nn {
                    let z = v[(i, n - 1)];
                    v[(i, n - 1)] = q * z + p * v[(i, n)];
                    v[(i, n)] = q * v[(i, n)] - p * z;
                }
                h[(n, n - 1)] = 0.0;
            }
            end -= 2;
            iter = 0;
        } else {
            let mut x = h[(n, n)];
            let mut y = h[(n - 1, n - 1)];
            let mut w = h[(n, n - 1)] * h[(n - 1, n)];

            if iter == 10 {
                exshift += x;
                for i in 0..=n {
                    h[(i, i)] -= x;
                }
                let s = h[(n, n - 1)].abs() + h[(n - 1, n - 2)].abs();
                x = 0.75 * s;
                y = x;
                w = -0.4375 * s * s;
            }
            if iter == 30 {
                let mut s = (y - x) * 0.5;
                s = s * s + w;
                if s > 0.0 {
                    s = s.sqrt();
                    if y < x {
                        s = -s;
                    }
                    s = x - w / ((y - x) * 0.5 + s);
                    for i in 0..=n {
                        h[(i, i)] -= s;
                    }
                    exshift += s;
                    x = 0.964;
                    y = x;
                    w = x;
                }
            }

            iter += 1;
            if iter > MAX_SWEEPS {
                return Err(SylvesterErrorKind::SchurNoConvergence {
                    row: n,
                    sweeps: MAX_SWEEPS,
                }
                .into());
            }

            // Look for two consecutive small subdiagonal elements.
            let (m, mut p, mut q, mut r) = {
                let mut m = n - 2;
                loop {
                    let z = h[(m, m)];
                    let rr = x - z;
                    let ss = y - z;
                    let p = (rr * ss - w) / h[(m + 1, m)] + h[(m, m + 1)];
                    let q = h[(m + 1, m + 1)] - z - rr - ss;
                    let r = h[(m + 2, m + 1)];
                    let s = p.abs() + q.abs() + r.abs();
                    let (p, q, r) = (p / s, q / s, r / s);
                    if m == l {
                        break (m, p, q, r);
                    }
                    let lhs = h[(m, m - 1)].abs() * (q.abs() + r.abs());
                    let rhs = eps
                        * (p.abs() * (h[(m - 1, m - 1)].abs() + z.abs() + h[(m + 1, m + 1)].abs()));
                    if lhs < rhs {
                        break (m, p, q, r);
                    }
                    m -= 1;
                }
            };

            for i in m + 2..=n {
                h[(i, i - 2)] = 0.0;
                if i > m + 2 {
                    h[(i, i - 3)] = 0.0;
                }
            }

            // Double QR step on rows l..=n and columns m..=n.
            for k in m..n {
                let notlast = k != n - 1;
                if k != m {
                    p = h[(k, k - 1)];
                    q = h[(k + 1, k - 1)];
                    r = if notlast { h[(k + 2, k - 1)] } else { 0.0 };
                    x = p.abs() + q.abs() + r.abs();
                    if x == 0.0 {
                        continue;
                    }
                    p /= x;
                    q /= x;
                    r /= x;
                }

                let mut s = (p * p + q * q + r * r).sqrt();
                if p < 0.0 {
                    s = -s;
                }
                if s == 0.0 {
                    continue;
                }
                if k != m {
                    h[(k, k - 1)] = -s * x;
                } else if l != m {
                    h[(k, k - 1)] = -h[(k, k - 1)];
                }
                p += s;
                x = p / s;
                y = q / s;
                let z = r / s;
                q /= p;
                r /= p;

                for j in k..nn {
                    let mut t = h[(k, j)] + q * h[(k + 1, j)];
                    if notlast {
                        t += r * h[(k + 2, j)];
                        h[(k + 2, j)] -= t * z;
                    }
                    h[(k, j)] -= t * x;
                    h[(k + 1, j)] -= t * y;
                }
                for i in 0..=n.min(k + 3) {
                    let mut t = x * h[(i, k)] + y * h[(i, k + 1)];
                    if notlast {
                        t += z * h[(i, k + 2)];
                        h[(i, k + 2)] -= t * r;
                    }
                    h[(i, k)] -= t;
                    h[(i, k + 1)] -= t * q;
                }
                for i in 0..nn {
                    let mut t = x * v[(i, k)] + y * v[(i, k + 1)];
                    if notlast {
                        t += z * v[(i, k + 2)];
                        v[(i, k + 2)] -= t * r;
                    }
                    v[(i, k)] -= t;
                    v[(i, k + 1)] -= t * q;
                }
            }
        }
    }
    Ok(())
}
