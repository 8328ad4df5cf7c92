//! Direct convolution micro-kernel contract and the portable kernels.
//!
//! A kernel computes one output tile of `T` pixels along a row for every
//! output block of an `(g, O4)` slice, reducing over the `I3` range of one
//! `I4` input slice. Partial sums live in an f32 tile `[O3 * O2][T][V]`
//! owned by the caller; the caller's epilogue consumes `RESTORE_OUTPUT`.

use crate::kernels::attr::KernelAttr;
use crate::layout::ActLayout;
use crate::params::ConvParams;
use std::ops::Range;

pub struct DirectCall<'a> {
    pub p: &'a ConvParams,
    pub input: &'a [f32],
    /// Input layout as seen by the kernel (flattened for 1x1 GEMM).
    pub layout: ActLayout,
    /// Packed `(g, O4, I4)` slice, `[O3][I3][O2][I2][kh][kw][Vi][Vo]`.
    pub weights: &'a [f32],
    pub acc: &'a mut [f32],
    pub n: usize,
    pub g: usize,
    pub oh: usize,
    pub ow0: usize,
    /// Global index of the first input block of the `I4` slice.
    pub ib0: usize,
    pub i3: Range<usize>,
    pub attr: KernelAttr,
}

impl DirectCall<'_> {
    pub fn tile_len(p: &ConvParams) -> usize {
        p.o3 * p.o2 * p.t * p.v
    }
}

/// Signature shared by every direct kernel.
///
/// # Safety
/// The CPU must support the instruction set the kernel was compiled for.
/// The binder only hands out kernels that passed runtime detection.
pub type DirectKernelFn = unsafe fn(&mut DirectCall<'_>);

/// `acc[0..v] += x * w[0..v]`
pub(crate) trait VecFma {
    unsafe fn fma(acc: *mut f32, w: *const f32, x: f32, v: usize);
}

pub(crate) struct Scalar;

impl VecFma for Scalar {
    #[inline(always)]
    unsafe fn fma(acc: *mut f32, w: *const f32, x: f32, v: usize) {
        for j in 0..v {
            *acc.add(j) += x * *w.add(j);
        }
    }
}

#[inline(always)]
pub(crate) unsafe fn direct_body<const T: usize, F: VecFma>(c: &mut DirectCall<'_>) {
    let p = c.p;
    let v = p.v;
    let lay = c.layout;
    let tile = T * v;
    let n_out = p.o3 * p.o2;
    debug_assert!(c.acc.len() >= n_out * tile);

    if c.attr.contains(KernelAttr::CLEAR_OUTPUT) {
        c.acc[..n_out * tile].fill(0.0);
    }

    let lane_stride = lay.lane_stride();
    let last_block = p.ib - 1;
    let masked = c.attr.contains(KernelAttr::REMAINDER_INPUT);
    let wblk = v * v;
    let acc = c.acc.as_mut_ptr();
    let wptr = c.weights.as_ptr();

    // Horizontal input coordinate of each tile column; None when padded.
    let mut cols = [None::<usize>; T];

    for i3 in c.i3.clone() {
        for i2 in 0..p.i2 {
            let ib = c.ib0 + i3 * p.i2 + i2;
            let lanes = if masked && ib == last_block { p.ir } else { v };
            for ky in 0..p.kh {
                let iy = (c.oh * p.sh + ky) as isize - p.pt as isize;
                if iy < 0 || iy as usize >= lay.h {
                    continue;
                }
                let iy = iy as usize;
                for kx in 0..p.kw {
                    for (t, col) in cols.iter_mut().enumerate() {
                        let ix = ((c.ow0 + t) * p.sw + kx) as isize - p.pl as isize;
                        *col = (ix >= 0 && (ix as usize) < lay.w)
                            .then(|| lay.offset(c.n, c.g, ib, iy, ix as usize));
                    }
                    for o3 in 0..p.o3 {
                        for o2 in 0..p.o2 {
                            let woff = (((((o3 * p.i3 + i3) * p.o2 + o2) * p.i2 + i2) * p.kh + ky)
                                * p.kw
                                + kx)
                                * wblk;
                            let dst = acc.add((o3 * p.o2 + o2) * tile);
                            for (t, col) in cols.iter().enumerate() {
                                let Some(base) = *col else { continue };
                                let src = c.input.as_ptr().add(base);
                                for vi in 0..lanes {
                                    F::fma(dst.add(t * v), wptr.add(woff + vi * v), *src.add(vi * lane_stride), v);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

pub unsafe fn direct_portable<const T: usize>(c: &mut DirectCall<'_>) {
    direct_body::<T, Scalar>(c)
}
