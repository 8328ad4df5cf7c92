//! `u8 x i8 -> i32` GEMM micro-kernel of the transformed-domain convolution.
//!
//! One call multiplies a `[I2][T][V]` slice of transformed input with a
//! `[O2][I2][Vi][Vo]` slice of transformed weights for one `(hA, wA)`
//! coordinate and folds the result into a `[O2][T][V]` output slice:
//!
//! `out += ws * s * (Σ q_in * q_w - z * Σ q_w)`
//!
//! `CLEAR_OUTPUT` starts from zero, `RESTORE_OUTPUT` adds the weight factor.

use crate::kernels::attr::KernelAttr;
use crate::params::WinoGemmParams;
use crate::tensor::Element;

/// Source quantization seen by one kernel call.
#[derive(Debug, Clone, Copy)]
pub enum SrcTile<'a> {
    /// Pre-folded into the weight scale and factor.
    Folded,
    Uniform { scale: f32, zero: f32 },
    /// One `(scale, zero)` per tile row; each slice has at least `T` entries.
    Rows { scale: &'a [f32], zero: &'a [f32] },
}

impl SrcTile<'_> {
    #[inline(always)]
    fn row(&self, t: usize) -> (f32, f32) {
        match *self {
            SrcTile::Folded => (1.0, 0.0),
            SrcTile::Uniform { scale, zero } => (scale, zero),
            SrcTile::Rows { scale, zero } => (scale[t], zero[t]),
        }
    }
}

pub struct GemmCall<'a, O> {
    pub p: &'a WinoGemmParams,
    pub output: &'a mut [O],
    pub input: &'a [u8],
    pub weights: &'a [i8],
    /// `[O2][V]`
    pub scale: &'a [f32],
    /// `[O2][V]`
    pub factor: &'a [f32],
    pub src: SrcTile<'a>,
    pub attr: KernelAttr,
}

pub type GemmKernelFn<O> = fn(&mut GemmCall<'_, O>);

/// Handles exactly `T` tile rows; rows are strided by `p.t` in every slice.
pub fn gemm_u8s8<const T: usize, O: Element>(c: &mut GemmCall<'_, O>) {
    let p = c.p;
    let v = p.v;
    let stride_t = p.t;
    let masked = c.attr.contains(KernelAttr::REMAINDER_INPUT);
    let clear = c.attr.contains(KernelAttr::CLEAR_OUTPUT);
    let restore = c.attr.contains(KernelAttr::RESTORE_OUTPUT);

    let mut acc = [[0i32; 16]; T];
    let mut wsum = [0i32; 16];

    for o2 in 0..p.o2 {
        for row in acc.iter_mut() {
            row[..v].fill(0);
        }
        wsum[..v].fill(0);

        for i2 in 0..p.i2 {
            let lanes = if masked && i2 + 1 == p.i2 { p.ir } else { v };
            let wblk = &c.weights[(o2 * p.i2 + i2) * v * v..];
            let iblk = &c.input[i2 * stride_t * v..];
            for vi in 0..lanes {
                let wrow = &wblk[vi * v..(vi + 1) * v];
                for (s, &q) in wsum[..v].iter_mut().zip(wrow) {
                    *s += q as i32;
                }
                for (t, row) in acc.iter_mut().enumerate() {
                    let x = iblk[t * v + vi] as i32;
                    for (a, &q) in row[..v].iter_mut().zip(wrow) {
                        *a += x * q as i32;
                    }
                }
            }
        }

        let ws = &c.scale[o2 * v..(o2 + 1) * v];
        let wf = &c.factor[o2 * v..(o2 + 1) * v];
        for (t, row) in acc.iter().enumerate() {
            let (s, z) = c.src.row(t);
            let out = &mut c.output[(o2 * stride_t + t) * v..(o2 * stride_t + t + 1) * v];
            for vo in 0..v {
                let mut val = ws[vo] * s * (row[vo] as f32 - z * wsum[vo] as f32);
                if !clear {
                    val += out[vo].to_f32();
                }
                if restore {
                    val += wf[vo];
                }
                out[vo] = O::from_f32(val);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::WinoGemmDesc;

    #[test]
    fn test_gemm_zero_point_correction() {
        let p = WinoGemmDesc::new(2, 4, 4, 2)
            .vector_width(4)
            .tile_width(2)
            .setup()
            .unwrap();
        // two rows of input all 3, weights identity
        let input = vec![3u8; 2 * 4];
        let mut weights = vec![0i8; 16];
        for i in 0..4 {
            weights[i * 4 + i] = 1;
        }
        let scale = vec![0.5f32; 4];
        let factor = vec![10.0f32; 4];
        let mut output = vec![f32::NAN; 2 * 4];
        let mut call = GemmCall {
            p: &p,
            output: &mut output,
            input: &input,
            weights: &weights,
            scale: &scale,
            factor: &factor,
            src: SrcTile::Uniform { scale: 2.0, zero: 1.0 },
            attr: KernelAttr::step(true, true, p.ir, p.v),
        };
        gemm_u8s8::<2, f32>(&mut call);
        // 0.5 * 2 * (3 - 1) + 10
        assert_eq!(output, vec![12.0; 8]);
    }

    #[test]
    fn test_gemm_accumulates_without_clear() {
        let p = WinoGemmDesc::new(2, 4, 4, 1)
            .vector_width(4)
            .tile_width(1)
            .setup()
            .unwrap();
        let input = vec![1u8; 4];
        let weights = vec![1i8; 16];
        let ones = vec![1.0f32; 4];
        let zeros = vec![0.0f32; 4];
        let mut output = vec![5.0f32; 4];
        let mut call = GemmCall {
            p: &p,
            output: &mut output,
            input: &input,
            weights: &weights,
            scale: &ones,
            factor: &zeros,
            src: SrcTile::Folded,
            attr: KernelAttr::empty(),
        };
        gemm_u8s8::<1, f32>(&mut call);
        assert_eq!(output, vec![9.0; 4]);
    }
}
