//! 2-D convolution lowered to GEMM.
//!
//! Forward:
//! 1. `im2col`: every output position of every sample becomes one row of
//!    the column matrix `[N·P, K]` (`P` = output positions, `K` =
//!    channels·kh·kw). Out-of-bounds reads are zero.
//! 2. `R[F, N·P] = W[F, K] · colᵗ + bias`.
//! 3. Fix-up of the filter-major `R` into `[N, F, oh, ow]`.
//!
//! Backward runs the same pipeline in reverse. `col2im` accumulates, so
//! overlapping windows sum their contributions.

use rayon::prelude::*;

use super::{Window2d, expect_shape, write_gradient, write_value};
use crate::matmul::{gemm_nn, gemm_nt, gemm_tn};
use crate::{Error, Result, Shape, Storage, Variable};

/// Variables touched by one convolution.
#[derive(Debug, Clone)]
pub struct ConvVariables<'a> {
    pub input: &'a Variable,
    pub weights: &'a Variable,
    pub bias: &'a Variable,
    /// Column matrix `[N·P, K]`.
    pub columns: &'a Variable,
    /// Filter-major GEMM result `[F, N·P]`.
    pub filter_major: &'a Variable,
    pub output: &'a Variable,
}

impl ConvVariables<'_> {
    /// Validate every variable against `geom`; returns the filter count.
    fn filters(&self, geom: &Window2d) -> Result<usize> {
        let x = self.input.dims();
        if x.len() != 4 || x[1..] != [geom.channels, geom.in_h, geom.in_w] {
            return Err(Error::InvalidShape(format!(
                "convolution input {} does not match geometry [N, {}, {}, {}]",
                self.input.shape(),
                geom.channels,
                geom.in_h,
                geom.in_w
            )));
        }
        let w = self.weights.dims();
        if w.len() != 2 || w[1] != geom.patch_len() {
            return Err(Error::InvalidShape(format!(
                "convolution weights {} do not match patch length {}",
                self.weights.shape(),
                geom.patch_len()
            )));
        }
        let (filters, batch) = (w[0], x[0]);
        let np = batch * geom.positions();
        expect_shape(self.bias, &Shape::new(&[filters])?)?;
        expect_shape(self.columns, &Shape::new(&[np, geom.patch_len()])?)?;
        expect_shape(self.filter_major, &Shape::new(&[filters, np])?)?;
        expect_shape(
            self.output,
            &Shape::new(&[batch, filters, geom.out_h, geom.out_w])?,
        )?;
        Ok(filters)
    }
}

/// Unfold one sample `[C, H, W]` into `[P, K]`.
pub(crate) fn im2col_sample(geom: &Window2d, x: &[f32], col: &mut [f32]) {
    let (kh, kw) = (geom.kernel_h, geom.kernel_w);
    let k = geom.patch_len();
    for oy in 0..geom.out_h {
        for ox in 0..geom.out_w {
            let row = &mut col[(oy * geom.out_w + ox) * k..][..k];
            let y0 = (oy * geom.stride_h) as isize - geom.pad_h as isize;
            let x0 = (ox * geom.stride_w) as isize - geom.pad_w as isize;
            for c in 0..geom.channels {
                let plane = &x[c * geom.in_plane()..][..geom.in_plane()];
                for ky in 0..kh {
                    let iy = y0 + ky as isize;
                    let dst = &mut row[(c * kh + ky) * kw..][..kw];
                    if iy < 0 || iy >= geom.in_h as isize {
                        dst.fill(0.0);
                        continue;
                    }
                    let src = &plane[iy as usize * geom.in_w..][..geom.in_w];
                    for (kx, d) in dst.iter_mut().enumerate() {
                        let ix = x0 + kx as isize;
                        *d = if ix < 0 || ix >= geom.in_w as isize {
                            0.0
                        } else {
                            src[ix as usize]
                        };
                    }
                }
            }
        }
    }
}

/// Fold `[P, K]` back into one sample `[C, H, W]`, adding into `dx`.
pub(crate) fn col2im_sample(geom: &Window2d, col: &[f32], dx: &mut [f32]) {
    let (kh, kw) = (geom.kernel_h, geom.kernel_w);
    let k = geom.patch_len();
    for oy in 0..geom.out_h {
        for ox in 0..geom.out_w {
            let row = &col[(oy * geom.out_w + ox) * k..][..k];
            let y0 = (oy * geom.stride_h) as isize - geom.pad_h as isize;
            let x0 = (ox * geom.stride_w) as isize - geom.pad_w as isize;
            for c in 0..geom.channels {
                for ky in 0..kh {
                    let iy = y0 + ky as isize;
                    if iy < 0 || iy >= geom.in_h as isize {
                        continue;
                    }
                    let base = c * geom.in_plane() + iy as usize * geom.in_w;
                    let src = &row[(c * kh + ky) * kw..][..kw];
                    for (kx, g) in src.iter().enumerate() {
                        let ix = x0 + kx as isize;
                        if ix >= 0 && ix < geom.in_w as isize {
                            dx[base + ix as usize] += g;
                        }
                    }
                }
            }
        }
    }
}

/// Batched `im2col`, parallel across samples.
pub fn im2col(geom: &Window2d, input: &[f32], columns: &mut [f32]) {
    let per_sample = geom.positions() * geom.patch_len();
    columns
        .par_chunks_mut(per_sample)
        .zip(input.par_chunks(geom.in_sample()))
        .for_each(|(col, x)| im2col_sample(geom, x, col));
}

/// Batched `col2im`, parallel across samples. Accumulates into `d_input`.
pub fn col2im(geom: &Window2d, columns: &[f32], d_input: &mut [f32]) {
    let per_sample = geom.positions() * geom.patch_len();
    d_input
        .par_chunks_mut(geom.in_sample())
        .zip(columns.par_chunks(per_sample))
        .for_each(|(dx, col)| col2im_sample(geom, col, dx));
}

pub fn forward(storage: &mut Storage, geom: &Window2d, vars: &ConvVariables<'_>) -> Result<()> {
    let filters = vars.filters(geom)?;
    let batch = vars.input.shape().batch_size();
    let positions = geom.positions();
    let np = batch * positions;
    let k = geom.patch_len();

    write_value(storage, vars.columns, |s, col| {
        im2col(geom, s.value(vars.input)?.data(), col.data_mut());
        Ok(())
    })?;

    write_value(storage, vars.filter_major, |s, r| {
        let w = s.value(vars.weights)?.data();
        let bias = s.value(vars.bias)?.data();
        let col = s.value(vars.columns)?.data();
        let r = r.data_mut();
        for (row, b) in r.chunks_exact_mut(np).zip(bias) {
            row.fill(*b);
        }
        gemm_nt(filters, np, k, w, col, 1.0, r);
        Ok(())
    })?;

    write_value(storage, vars.output, |s, out| {
        let r = s.value(vars.filter_major)?.data();
        out.data_mut()
            .par_chunks_mut(filters * positions)
            .enumerate()
            .for_each(|(n, sample)| {
                for (f, plane) in sample.chunks_exact_mut(positions).enumerate() {
                    plane.copy_from_slice(&r[f * np + n * positions..][..positions]);
                }
            });
        Ok(())
    })
}

pub fn backward(storage: &mut Storage, geom: &Window2d, vars: &ConvVariables<'_>) -> Result<()> {
    let filters = vars.filters(geom)?;
    let batch = vars.input.shape().batch_size();
    let positions = geom.positions();
    let np = batch * positions;
    let k = geom.patch_len();

    // Inverse fix-up: [N, F, P] -> [F, N·P].
    write_gradient(storage, vars.filter_major, |s, dr| {
        let dy = s.gradient(vars.output)?.data();
        dr.data_mut()
            .par_chunks_mut(np)
            .enumerate()
            .for_each(|(f, row)| {
                for (n, dst) in row.chunks_exact_mut(positions).enumerate() {
                    dst.copy_from_slice(&dy[(n * filters + f) * positions..][..positions]);
                }
            });
        Ok(())
    })?;

    write_gradient(storage, vars.weights, |s, dw| {
        let dr = s.gradient(vars.filter_major)?.data();
        let col = s.value(vars.columns)?.data();
        gemm_nn(filters, k, np, dr, col, 0.0, dw.data_mut());
        Ok(())
    })?;

    write_gradient(storage, vars.bias, |s, db| {
        let dr = s.gradient(vars.filter_major)?.data();
        for (b, row) in db.data_mut().iter_mut().zip(dr.chunks_exact(np)) {
            *b = row.iter().sum();
        }
        Ok(())
    })?;

    write_gradient(storage, vars.columns, |s, dcol| {
        let dr = s.gradient(vars.filter_major)?.data();
        let w = s.value(vars.weights)?.data();
        gemm_tn(np, k, filters, dr, w, 0.0, dcol.data_mut());
        Ok(())
    })?;

    write_gradient(storage, vars.input, |s, dx| {
        let dcol = s.gradient(vars.columns)?.data();
        let dx = dx.data_mut();
        dx.fill(0.0);
        col2im(geom, dcol, dx);
        Ok(())
    })
}
