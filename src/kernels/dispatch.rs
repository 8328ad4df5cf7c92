//! Kernel tables and the binder that picks full-width and remainder kernels
//! for a configured instance.

use crate::error::{ConvError, Result};
use crate::kernels::direct::{direct_portable, DirectKernelFn};
use crate::kernels::u8s8_gemm::{gemm_u8s8, GemmKernelFn};
use crate::params::{ConvParams, WinoGemmParams};
use crate::tensor::Element;

pub const MAX_DIRECT_TILE: usize = 16;
pub const MAX_GEMM_TILE: usize = 32;

/// Instruction set the direct kernels were selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdLevel {
    Scalar,
    Avx2,
    Neon,
}

impl SimdLevel {
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return SimdLevel::Avx2;
            }
        }
        #[cfg(target_arch = "aarch64")]
        {
            if std::arch::is_aarch64_feature_detected!("neon") {
                return SimdLevel::Neon;
            }
        }
        SimdLevel::Scalar
    }

    /// Level usable for vector width `v`.
    pub fn for_width(self, v: usize) -> Self {
        match self {
            SimdLevel::Avx2 if v % 8 != 0 => SimdLevel::Scalar,
            level => level,
        }
    }
}

macro_rules! tile_table {
    ($ty:ty, $f:ident) => {
        [
            $f::<1> as $ty, $f::<2>, $f::<3>, $f::<4>,
            $f::<5>, $f::<6>, $f::<7>, $f::<8>,
            $f::<9>, $f::<10>, $f::<11>, $f::<12>,
            $f::<13>, $f::<14>, $f::<15>, $f::<16>,
        ]
    };
}

macro_rules! wide_tile_table {
    ($ty:ty, $f:ident, $g:ty) => {
        [
            $f::<1, $g> as $ty, $f::<2, $g>, $f::<3, $g>, $f::<4, $g>,
            $f::<5, $g>, $f::<6, $g>, $f::<7, $g>, $f::<8, $g>,
            $f::<9, $g>, $f::<10, $g>, $f::<11, $g>, $f::<12, $g>,
            $f::<13, $g>, $f::<14, $g>, $f::<15, $g>, $f::<16, $g>,
            $f::<17, $g>, $f::<18, $g>, $f::<19, $g>, $f::<20, $g>,
            $f::<21, $g>, $f::<22, $g>, $f::<23, $g>, $f::<24, $g>,
            $f::<25, $g>, $f::<26, $g>, $f::<27, $g>, $f::<28, $g>,
            $f::<29, $g>, $f::<30, $g>, $f::<31, $g>, $f::<32, $g>,
        ]
    };
}

fn direct_table(level: SimdLevel) -> [DirectKernelFn; MAX_DIRECT_TILE] {
    match level {
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 => {
            use crate::kernels::avx::direct::direct_avx2;
            tile_table!(DirectKernelFn, direct_avx2)
        }
        #[cfg(target_arch = "aarch64")]
        SimdLevel::Neon => {
            use crate::kernels::neon::direct::direct_neon;
            tile_table!(DirectKernelFn, direct_neon)
        }
        _ => tile_table!(DirectKernelFn, direct_portable),
    }
}

/// Looks up the direct kernel of width `t`.
pub fn direct_kernel(level: SimdLevel, t: usize) -> Result<DirectKernelFn> {
    if t == 0 || t > MAX_DIRECT_TILE {
        return Err(ConvError::UnsupportedTile {
            width: t,
            max: MAX_DIRECT_TILE,
        });
    }
    Ok(direct_table(level)[t - 1])
}

/// Full-width and remainder kernels bound to one instance.
#[derive(Clone, Copy)]
pub struct DirectKernels {
    pub full: DirectKernelFn,
    pub tail: DirectKernelFn,
    pub level: SimdLevel,
}

impl DirectKernels {
    pub fn bind(p: &ConvParams) -> Result<Self> {
        Self::bind_with(p, SimdLevel::detect())
    }

    /// Binds kernels for `level`, or scalar ones when this CPU lacks it.
    pub fn bind_with(p: &ConvParams, level: SimdLevel) -> Result<Self> {
        let level = if level == SimdLevel::detect() {
            level.for_width(p.v)
        } else {
            SimdLevel::Scalar
        };
        Ok(Self {
            full: direct_kernel(level, p.t)?,
            tail: direct_kernel(level, p.tr)?,
            level,
        })
    }

    /// The last tile along the split spatial axis always gets the tail kernel.
    #[inline]
    pub fn select(&self, p: &ConvParams, wt: usize) -> DirectKernelFn {
        if wt + 1 == p.wt {
            self.tail
        } else {
            self.full
        }
    }
}

impl std::fmt::Debug for DirectKernels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectKernels").field("level", &self.level).finish()
    }
}

pub fn gemm_kernel<O: Element>(t: usize) -> Result<GemmKernelFn<O>> {
    if t == 0 || t > MAX_GEMM_TILE {
        return Err(ConvError::UnsupportedTile {
            width: t,
            max: MAX_GEMM_TILE,
        });
    }
    let table: [GemmKernelFn<O>; MAX_GEMM_TILE] = wide_tile_table!(GemmKernelFn<O>, gemm_u8s8, O);
    Ok(table[t - 1])
}

pub struct GemmKernels<O: Element> {
    pub full: GemmKernelFn<O>,
    pub tail: GemmKernelFn<O>,
}

impl<O: Element> GemmKernels<O> {
    pub fn bind(p: &WinoGemmParams) -> Result<Self> {
        Ok(Self {
            full: gemm_kernel::<O>(p.t)?,
            tail: gemm_kernel::<O>(p.tr)?,
        })
    }

    #[inline]
    pub fn select(&self, p: &WinoGemmParams, t2: usize) -> GemmKernelFn<O> {
        if t2 + 1 == p.t2 {
            self.tail
        } else {
            self.full
        }
    }
}
