//! Strided GEMM used by the dense and convolution operators.
//!
//! - default: a plain triple loop
//! - optional: the `matrixmultiply` backend (`--features matrixmultiply`)
//!
//! All matrices are row-major slices. The `nn`/`tn`/`nt` helpers name which
//! operand is read transposed, so callers never materialize a transpose.

/// `C = alpha * A·B + beta * C` with arbitrary row/column strides.
///
/// `A` is `m x k`, `B` is `k x n`, `C` is `m x n`. With `beta == 0` the
/// previous contents of `C` are ignored (never read), so `C` may hold garbage.
#[allow(clippy::too_many_arguments)]
#[inline]
pub(crate) fn gemm_f32(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    rsa: usize,
    csa: usize,
    b: &[f32],
    rsb: usize,
    csb: usize,
    beta: f32,
    c: &mut [f32],
    rsc: usize,
    csc: usize,
) {
    debug_assert!(m > 0 && n > 0 && k > 0);
    debug_assert!(a.len() > (m - 1) * rsa + (k - 1) * csa);
    debug_assert!(b.len() > (k - 1) * rsb + (n - 1) * csb);
    debug_assert!(c.len() > (m - 1) * rsc + (n - 1) * csc);

    #[cfg(feature = "matrixmultiply")]
    {
        assert!(
            m > 0
                && n > 0
                && k > 0
                && a.len() > (m - 1) * rsa + (k - 1) * csa
                && b.len() > (k - 1) * rsb + (n - 1) * csb
                && c.len() > (m - 1) * rsc + (n - 1) * csc,
            "gemm operand too short for {m}x{k}·{k}x{n}"
        );
        // SAFETY: the assertion above bounds every strided access, and all
        // three slices outlive the call.
        unsafe {
            matrixmultiply::sgemm(
                m,
                k,
                n,
                alpha,
                a.as_ptr(),
                rsa as isize,
                csa as isize,
                b.as_ptr(),
                rsb as isize,
                csb as isize,
                beta,
                c.as_mut_ptr(),
                rsc as isize,
                csc as isize,
            );
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for i in 0..m {
        let a0 = i * rsa;
        for j in 0..n {
            let b0 = j * csb;
            let mut acc = 0.0_f32;
            for p in 0..k {
                acc = a[a0 + p * csa].mul_add(b[p * rsb + b0], acc);
            }
            let idx = i * rsc + j * csc;
            c[idx] = if beta == 0.0 {
                alpha * acc
            } else {
                alpha * acc + beta * c[idx]
            };
        }
    }
}

/// `C[m,n] = A[m,k] · B[k,n]` (+ `beta * C`).
#[inline]
pub(crate) fn gemm_nn(m: usize, n: usize, k: usize, a: &[f32], b: &[f32], beta: f32, c: &mut [f32]) {
    gemm_f32(m, n, k, 1.0, a, k, 1, b, n, 1, beta, c, n, 1);
}

/// `C[m,n] = Aᵗ · B` where `A` is stored as `[k, m]`.
#[inline]
pub(crate) fn gemm_tn(m: usize, n: usize, k: usize, a: &[f32], b: &[f32], beta: f32, c: &mut [f32]) {
    gemm_f32(m, n, k, 1.0, a, 1, m, b, n, 1, beta, c, n, 1);
}

/// `C[m,n] = A · Bᵗ` where `B` is stored as `[n, k]`.
#[inline]
pub(crate) fn gemm_nt(m: usize, n: usize, k: usize, a: &[f32], b: &[f32], beta: f32, c: &mut [f32]) {
    gemm_f32(m, n, k, 1.0, a, k, 1, b, 1, k, beta, c, n, 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // a = [[1, 2, 3], [4, 5, 6]]  (2x3)
    const A: [f32; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

    #[test]
    fn nn_matches_hand_product() {
        // b = [[1, 0], [0, 1], [1, 1]] (3x2)
        let b = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut c = [0.0; 4];
        gemm_nn(2, 2, 3, &A, &b, 0.0, &mut c);
        assert_eq!(c, [4.0, 5.0, 10.0, 11.0]);
    }

    #[test]
    fn tn_reads_first_operand_transposed() {
        // Aᵗ·A = 3x3 gram matrix
        let mut c = [0.0; 9];
        gemm_tn(3, 3, 2, &A, &A, 0.0, &mut c);
        assert_eq!(c, [17.0, 22.0, 27.0, 22.0, 29.0, 36.0, 27.0, 36.0, 45.0]);
    }

    #[test]
    fn nt_reads_second_operand_transposed() {
        // A·Aᵗ = 2x2 gram matrix
        let mut c = [0.0; 4];
        gemm_nt(2, 2, 3, &A, &A, 0.0, &mut c);
        assert_eq!(c, [14.0, 32.0, 32.0, 77.0]);
    }

    #[test]
    fn zero_beta_ignores_stale_output() {
        let b = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut c = [f32::NAN; 4];
        gemm_nn(2, 2, 3, &A, &b, 0.0, &mut c);
        assert!(c.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn unit_beta_accumulates() {
        let b = [1.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut c = [1.0; 4];
        gemm_nn(2, 2, 3, &A, &b, 1.0, &mut c);
        assert_eq!(c, [5.0, 6.0, 11.0, 12.0]);
    }

    #[test]
    #[should_panic]
    fn short_operand_panics_instead_of_reading_past_the_end() {
        let b = [1.0, 0.0, 0.0, 1.0];
        let mut c = [0.0; 4];
        gemm_nn(2, 2, 3, &A, &b, 0.0, &mut c);
    }
}
