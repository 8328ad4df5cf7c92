//! Scale / zero-point bookkeeping for the int8 transformed-domain GEMM.
//!
//! Inputs are asymmetric `u8` (`x ≈ s * (q - z)`), weights symmetric `i8`
//! (`w ≈ ws * q`). The GEMM epilogue undoes both.

use crate::error::{ConvError, Result};
use crate::params::WinoGemmParams;

/// Granularity of the source (input) quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SamplingKind {
    /// One `(scale, zero_point)` pair for the whole tensor.
    Coarse,
    /// One pair per `(t2, hA, wA, I3, tile row)`.
    Fine,
    /// Pre-folded into the weight scale/factor; nothing at runtime.
    Calibrated,
}

/// Asymmetric `u8` parameters covering `data`, the way dynamic linear
/// quantization picks them: the range always includes zero.
pub fn dynamic_range(data: &[f32]) -> (f32, f32) {
    if data.is_empty() {
        return (1.0, 0.0);
    }
    let mut min_val = f32::MAX;
    let mut max_val = f32::MIN;
    for &v in data {
        min_val = min_val.min(v);
        max_val = max_val.max(v);
    }
    let adjusted_max = max_val.max(0.0);
    let adjusted_min = min_val.min(0.0);
    let range = (adjusted_max - adjusted_min).max(1e-5);
    let scale = range / 255.0;
    let zp = (-adjusted_min / scale).round().clamp(0.0, 255.0);
    (scale, zp)
}

pub fn quantize_u8(data: &[f32], scale: f32, zp: f32, out: &mut [u8]) {
    assert_eq!(data.len(), out.len());
    let inv_scale = 1.0 / scale;
    for (q, &x) in out.iter_mut().zip(data) {
        *q = (x * inv_scale + zp).round().clamp(0.0, 255.0) as u8;
    }
}

/// Symmetric `i8` quantization; returns the scale.
pub fn quantize_i8_symmetric(data: &[f32], out: &mut [i8]) -> f32 {
    assert_eq!(data.len(), out.len());
    let amax = data.iter().fold(0.0f32, |m, &x| m.max(x.abs())).max(1e-8);
    let scale = amax / 127.0;
    let inv_scale = 1.0 / scale;
    for (q, &x) in out.iter_mut().zip(data) {
        *q = (x * inv_scale).round().clamp(-127.0, 127.0) as i8;
    }
    scale
}

/// Folds a global source `(scale, zero_point)` into the weight scale and
/// factor tensors of one `O4` slice so the GEMM can run with
/// [`SamplingKind::Calibrated`].
///
/// `tweights` holds every `I4` slice, `[I4][O3][I3][A][A][O2][I2][Vi][Vo]`.
/// Afterwards `ws' = ws * s` and `wf' = wf - s * z * ws * Σ q_w`, where the
/// sum runs over the whole input-channel reduction.
pub fn fold_calibration(
    p: &WinoGemmParams,
    tweights: &[i8],
    weights_scale: &mut [f32],
    weights_factor: &mut [f32],
    src_scale: f32,
    src_zero: f32,
) -> Result<()> {
    let slice_len = p.tweights_len();
    if tweights.len() != p.i4 * slice_len {
        return Err(ConvError::BufferSize {
            what: "tweights",
            expected: p.i4 * slice_len,
            found: tweights.len(),
        });
    }
    if weights_scale.len() != p.scale_len() || weights_factor.len() != p.scale_len() {
        return Err(ConvError::ScaleTensor(format!(
            "expected {} entries, got scale={} factor={}",
            p.scale_len(),
            weights_scale.len(),
            weights_factor.len()
        )));
    }
    let sums = weight_sums(p, tweights);
    for ((ws, wf), sum) in weights_scale.iter_mut().zip(weights_factor.iter_mut()).zip(sums) {
        *wf -= src_scale * src_zero * *ws * sum as f32;
        *ws *= src_scale;
    }
    Ok(())
}

/// `Σ q_w` per output lane `[O3][A][A][O2][Vo]` across every `I4` slice.
fn weight_sums(p: &WinoGemmParams, tweights: &[i8]) -> Vec<i32> {
    let (a, v) = (p.a, p.v);
    let mut sums = vec![0i32; p.scale_len()];
    for slice in tweights.chunks_exact(p.tweights_len()) {
        for o3 in 0..p.o3 {
            for i3 in 0..p.i3 {
                for ha in 0..a {
                    for wa in 0..a {
                        for o2 in 0..p.o2 {
                            let dst = (((o3 * a + ha) * a + wa) * p.o2 + o2) * v;
                            for i2 in 0..p.i2 {
                                let src = ((((((o3 * p.i3 + i3) * a + ha) * a + wa) * p.o2 + o2)
                                    * p.i2
                                    + i2)
                                    * v)
                                    * v;
                                for vi in 0..v {
                                    let row = &slice[src + vi * v..src + (vi + 1) * v];
                                    for (s, &q) in sums[dst..dst + v].iter_mut().zip(row) {
                                        *s += q as i32;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::WinoGemmDesc;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_dynamic_range_includes_zero() {
        let (scale, zp) = dynamic_range(&[1.0, 2.0, 3.0]);
        assert_abs_diff_eq!(scale, 3.0 / 255.0, epsilon = 1e-7);
        assert_eq!(zp, 0.0);
        // -min / scale = 63.75, clear of a rounding tie
        let (scale, zp) = dynamic_range(&[-1.0, 3.0]);
        assert_abs_diff_eq!(scale, 4.0 / 255.0, epsilon = 1e-7);
        assert_eq!(zp, 64.0);
        let (_, zp) = dynamic_range(&[-2.0, -0.5]);
        assert_eq!(zp, 255.0);
    }

    #[test]
    fn test_quantize_u8_dequantizes_close() {
        let data = [-0.7f32, -0.1, 0.0, 0.3, 1.9];
        let (s, z) = dynamic_range(&data);
        let mut q = [0u8; 5];
        quantize_u8(&data, s, z, &mut q);
        for (&x, &qi) in data.iter().zip(&q) {
            assert_abs_diff_eq!(s * (qi as f32 - z), x, epsilon = s);
        }
    }

    #[test]
    fn test_quantize_i8_symmetric() {
        let mut q = [0i8; 3];
        let s = quantize_i8_symmetric(&[-2.0, 1.0, 0.0], &mut q);
        assert_eq!(q, [-127, 64, 0]);
        assert_abs_diff_eq!(s, 2.0 / 127.0, epsilon = 1e-7);
    }

    #[test]
    fn test_fold_calibration_factor() {
        let p = WinoGemmDesc::new(2, 4, 4, 1)
            .vector_width(4)
            .setup()
            .unwrap();
        let tweights = vec![1i8; p.tweights_len()];
        let mut ws = vec![0.5f32; p.scale_len()];
        let mut wf = vec![1.0f32; p.scale_len()];
        fold_calibration(&p, &tweights, &mut ws, &mut wf, 0.1, 3.0).unwrap();
        // Σ q_w = 4 input lanes per output lane
        assert_abs_diff_eq!(ws[0], 0.05, epsilon = 1e-7);
        assert_abs_diff_eq!(wf[0], 1.0 - 0.1 * 3.0 * 0.5 * 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fold_calibration_rejects_short_scale() {
        let p = WinoGemmDesc::new(2, 4, 4, 1).vector_width(4).setup().unwrap();
        let tweights = vec![0i8; p.tweights_len()];
        let mut ws = vec![0.0; 1];
        let mut wf = vec![0.0; p.scale_len()];
        let err = fold_calibration(&p, &tweights, &mut ws, &mut wf, 1.0, 0.0).unwrap_err();
        assert!(matches!(err, ConvError::ScaleTensor(_)));
    }
}
