//! Plain-layout reference convolutions used to check the blocked engine.
//!
//! Input `[n][g*ic][ih][iw]`, weights `[g*oc][ic][kh][kw]`, output
//! `[n][g*oc][oh][ow]`. Bias and the activation clamp are applied.

use crate::kernels::activations::clamp_opt;
use crate::params::ConvParams;
use faer::linalg::matmul::matmul as faer_matmul;
use faer::mat::{MatMut, MatRef};
use faer::{Accum, Par};
use std::cell::RefCell;

fn plain_output_len(p: &ConvParams) -> usize {
    p.n * p.g * p.oc * p.oh * p.ow
}

/// Direct nested-loop convolution.
pub fn conv_ref(p: &ConvParams, input: &[f32], weights: &[f32], bias: Option<&[f32]>) -> Vec<f32> {
    assert_eq!(input.len(), p.n * p.g * p.ic * p.ih * p.iw, "conv_ref: input size");
    assert_eq!(weights.len(), p.g * p.oc * p.ic * p.kh * p.kw, "conv_ref: weight size");
    let mut out = vec![0.0f32; plain_output_len(p)];
    let act = p.activation.as_ref();
    for n in 0..p.n {
        for g in 0..p.g {
            for o in 0..p.oc {
                let oc = g * p.oc + o;
                let b = bias.map_or(0.0, |b| b[oc]);
                for oy in 0..p.oh {
                    for ox in 0..p.ow {
                        let mut acc = 0.0f32;
                        for i in 0..p.ic {
                            let ic = g * p.ic + i;
                            for ky in 0..p.kh {
                                let iy = (oy * p.sh + ky) as isize - p.pt as isize;
                                if iy < 0 || iy as usize >= p.ih {
                                    continue;
                                }
                                for kx in 0..p.kw {
                                    let ix = (ox * p.sw + kx) as isize - p.pl as isize;
                                    if ix < 0 || ix as usize >= p.iw {
                                        continue;
                                    }
                                    let x = input[((n * p.g * p.ic + ic) * p.ih + iy as usize) * p.iw + ix as usize];
                                    let w = weights[((oc * p.ic + i) * p.kh + ky) * p.kw + kx];
                                    acc += x * w;
                                }
                            }
                        }
                        out[((n * p.g * p.oc + oc) * p.oh + oy) * p.ow + ox] = clamp_opt(act, acc + b);
                    }
                }
            }
        }
    }
    out
}

/// im2col + GEMM convolution.
pub fn conv_im2col(p: &ConvParams, input: &[f32], weights: &[f32], bias: Option<&[f32]>) -> Vec<f32> {
    assert_eq!(input.len(), p.n * p.g * p.ic * p.ih * p.iw, "conv_im2col: input size");
    assert_eq!(weights.len(), p.g * p.oc * p.ic * p.kh * p.kw, "conv_im2col: weight size");
    let mut out = vec![0.0f32; plain_output_len(p)];
    let col_rows = p.ic * p.kh * p.kw;
    let col_cols = p.oh * p.ow;

    // Reuse thread-local im2col buffer to avoid repeated allocation
    thread_local! {
        static COL_BUF: RefCell<Vec<f32>> = const { RefCell::new(Vec::new()) };
    }
    COL_BUF.with(|buf| {
        let mut buf = buf.borrow_mut();
        let needed = col_rows * col_cols;
        if buf.len() < needed {
            buf.resize(needed, 0.0);
        }
        let col = &mut buf[..needed];

        for n in 0..p.n {
            for g in 0..p.g {
                im2col(p, input, n, g, col);
                let w_offset = g * p.oc * col_rows;
                let o_offset = (n * p.g + g) * p.oc * col_cols;
                // SAFETY: offsets and extents stay inside `weights`, `col` and `out`.
                unsafe {
                    let w_mat = MatRef::<f32>::from_raw_parts(
                        weights.as_ptr().add(w_offset),
                        p.oc,
                        col_rows,
                        col_rows as isize,
                        1,
                    );
                    let col_mat = MatRef::<f32>::from_raw_parts(col.as_ptr(), col_rows, col_cols, col_cols as isize, 1);
                    let out_mat = MatMut::<f32>::from_raw_parts_mut(
                        out.as_mut_ptr().add(o_offset),
                        p.oc,
                        col_cols,
                        col_cols as isize,
                        1,
                    );
                    faer_matmul(out_mat, Accum::Replace, w_mat, col_mat, 1.0, Par::Seq);
                }
            }
        }
    });

    let act = p.activation.as_ref();
    for (row, plane) in out.chunks_exact_mut(col_cols).enumerate() {
        let b = bias.map_or(0.0, |b| b[row % (p.g * p.oc)]);
        for v in plane.iter_mut() {
            *v = clamp_opt(act, *v + b);
        }
    }
    out
}

/// Unfolds the `g`-th channel group of image `n` into `[ic*kh*kw][oh*ow]`.
fn im2col(p: &ConvParams, input: &[f32], n: usize, g: usize, col: &mut [f32]) {
    let spatial = p.oh * p.ow;
    for c in 0..p.ic {
        let ch_offset = ((n * p.g + g) * p.ic + c) * p.ih * p.iw;
        for ky in 0..p.kh {
            for kx in 0..p.kw {
                let row = ((c * p.kh + ky) * p.kw + kx) * spatial;
                for oy in 0..p.oh {
                    let iy = (oy * p.sh + ky) as isize - p.pt as isize;
                    let dst = &mut col[row + oy * p.ow..row + (oy + 1) * p.ow];
                    if iy < 0 || iy as usize >= p.ih {
                        // Entire row is padding
                        dst.fill(0.0);
                        continue;
                    }
                    let in_row = ch_offset + iy as usize * p.iw;
                    for (ox, d) in dst.iter_mut().enumerate() {
                        let ix = (ox * p.sw + kx) as isize - p.pl as isize;
                        *d = if ix >= 0 && (ix as usize) < p.iw {
                            input[in_row + ix as usize]
                        } else {
                            0.0
                        };
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::activations::Activation;
    use crate::params::ConvDesc;
    use approx::assert_relative_eq;

    #[test]
    fn test_ref_identity_kernel() {
        let p = ConvDesc::new(1, 1, 1, (2, 3), (1, 1)).setup().unwrap();
        let input = [1.0, -2.0, 3.0, -4.0, 5.0, -6.0];
        let out = conv_ref(&p, &input, &[2.0], Some(&[1.0]));
        assert_eq!(out, vec![3.0, -3.0, 7.0, -7.0, 11.0, -11.0]);
    }

    #[test]
    fn test_im2col_matches_ref() {
        let p = ConvDesc::new(2, 3, 4, (5, 6), (3, 2))
            .groups(2)
            .pads(1, 0, 2, 1)
            .strides(2, 1)
            .activation(Activation::relu())
            .setup()
            .unwrap();
        let input: Vec<f32> = (0..p.n * p.g * p.ic * p.ih * p.iw)
            .map(|i| ((i * 7) % 13) as f32 - 6.0)
            .collect();
        let weights: Vec<f32> = (0..p.g * p.oc * p.ic * p.kh * p.kw)
            .map(|i| ((i * 5) % 11) as f32 * 0.1 - 0.5)
            .collect();
        let bias: Vec<f32> = (0..p.g * p.oc).map(|i| i as f32 * 0.25).collect();
        let a = conv_ref(&p, &input, &weights, Some(&bias));
        let b = conv_im2col(&p, &input, &weights, Some(&bias));
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x, y, epsilon = 1e-4, max_relative = 1e-5);
        }
    }
}
