use crate::kernels::direct::{direct_body, DirectCall, VecFma};
use std::arch::x86_64::*;

pub(crate) struct Avx2;

impl VecFma for Avx2 {
    /// `v` must be a multiple of 8.
    #[inline]
    #[target_feature(enable = "avx2", enable = "fma")]
    unsafe fn fma(acc: *mut f32, w: *const f32, x: f32, v: usize) {
        let xv = _mm256_set1_ps(x);
        let mut j = 0;
        while j < v {
            let a = _mm256_loadu_ps(acc.add(j));
            let b = _mm256_loadu_ps(w.add(j));
            _mm256_storeu_ps(acc.add(j), _mm256_fmadd_ps(xv, b, a));
            j += 8;
        }
    }
}

#[target_feature(enable = "avx2", enable = "fma")]
pub unsafe fn direct_avx2<const T: usize>(c: &mut DirectCall<'_>) {
    debug_assert!(c.p.v % 8 == 0);
    direct_body::<T, Avx2>(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::direct::Scalar;

    #[test]
    fn test_avx2_fma_matches_scalar() {
        if !(is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")) {
            return;
        }
        let w: Vec<f32> = (0..16).map(|i| i as f32 * 0.25 - 2.0).collect();
        let mut simd: Vec<f32> = (0..16).map(|i| (i % 5) as f32).collect();
        let mut scalar = simd.clone();
        unsafe {
            Avx2::fma(simd.as_mut_ptr(), w.as_ptr(), 3.0, 16);
            Scalar::fma(scalar.as_mut_ptr(), w.as_ptr(), 3.0, 16);
        }
        // small integers and quarters: fused and unfused agree exactly
        assert_eq!(simd, scalar);
    }
}
