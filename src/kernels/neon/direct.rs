#![allow(unsafe_op_in_unsafe_fn)]

use crate::kernels::direct::{direct_body, DirectCall, VecFma};
use core::arch::aarch64::*;

pub(crate) struct Neon;

impl VecFma for Neon {
    /// `v` must be a multiple of 4.
    #[inline]
    #[target_feature(enable = "neon")]
    unsafe fn fma(acc: *mut f32, w: *const f32, x: f32, v: usize) {
        let mut j = 0;
        while j < v {
            let a = vld1q_f32(acc.add(j));
            let b = vld1q_f32(w.add(j));
            vst1q_f32(acc.add(j), vfmaq_n_f32(a, b, x));
            j += 4;
        }
    }
}

#[target_feature(enable = "neon")]
pub unsafe fn direct_neon<const T: usize>(c: &mut DirectCall<'_>) {
    direct_body::<T, Neon>(c)
}
