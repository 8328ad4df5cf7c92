//! Int8 GEMM stage of a Winograd convolution.
//!
//! Operates entirely in the transformed domain on one `O4` slice; the caller
//! invokes it once per `I4` slice of the input-channel reduction. Tensor
//! layouts (per `O4` slice):
//!
//! * `tinput`  `u8  [t2][A][A][I3][I2][T][V]`
//! * `tweights` `i8 [O3][I3][A][A][O2][I2][Vi][Vo]` (the current `I4` slice)
//! * `toutput` `O   [t2][A][A][O3][O2][T][V]`
//! * `weights_scale`, `weights_factor` `f32 [O3][A][A][O2][V]`

use crate::conv::partition::{IterSpace, Partitioner};
use crate::error::{check_len, ConvError, Result};
use crate::kernels::attr::KernelAttr;
use crate::kernels::dispatch::GemmKernels;
use crate::kernels::u8s8_gemm::{GemmCall, SrcTile};
use crate::params::WinoGemmParams;
use crate::quantization::SamplingKind;
use crate::stats::ExecStats;
use crate::tensor::{Element, SharedMut};

/// Source quantization supplied at runtime.
#[derive(Debug, Clone, Copy)]
pub enum SrcSample<'a> {
    /// For [`SamplingKind::Calibrated`].
    None,
    /// For [`SamplingKind::Coarse`].
    Scalar { scale: f32, zero: f32 },
    /// For [`SamplingKind::Fine`]: `[t2][A][A][I3][2][T]`, scale row then
    /// zero-point row.
    PerTile(&'a [f32]),
}

/// Per-thread rotation of the `(hA, wA)` start coordinate in
/// [`WinoGemm::execute_tiled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scramble {
    /// Rotate when `T == Tr` or there are at least two tiles per thread.
    Auto,
    Always,
    Never,
}

pub struct WinoGemm<O: Element = f32> {
    params: WinoGemmParams,
    kernels: GemmKernels<O>,
    partitioner: Partitioner,
    stats: ExecStats,
}

/// Borrowed inputs of one call.
struct Operands<'a, O> {
    toutput: SharedMut<'a, O>,
    tinput: &'a [u8],
    tweights: &'a [i8],
    scale: &'a [f32],
    factor: &'a [f32],
    src: SrcSample<'a>,
    i4: usize,
}

impl<O: Element> WinoGemm<O> {
    pub fn new(params: WinoGemmParams) -> Result<Self> {
        Ok(Self {
            kernels: GemmKernels::bind(&params)?,
            partitioner: Partitioner::new(params.nthreads)?,
            params,
            stats: ExecStats::default(),
        })
    }

    pub fn params(&self) -> &WinoGemmParams {
        &self.params
    }

    pub fn stats(&self) -> &ExecStats {
        &self.stats
    }

    /// Whether [`Scramble::Auto`] rotates for this configuration.
    pub fn scrambles(&self, scramble: Scramble) -> bool {
        let p = &self.params;
        match scramble {
            Scramble::Auto => p.t == p.tr || p.t2 >= 2 * self.partitioner.nthreads(),
            Scramble::Always => true,
            Scramble::Never => false,
        }
    }

    /// Coordinate-parallel schedule over `(hA, wA, I3*, O3, t2)`.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        toutput: &mut [O],
        tinput: &[u8],
        tweights: &[i8],
        weights_scale: &[f32],
        weights_factor: &[f32],
        src: SrcSample<'_>,
        i4: usize,
    ) -> Result<()> {
        let ops = self.check(toutput, tinput, tweights, weights_scale, weights_factor, src, i4)?;
        let p = &self.params;
        let space = IterSpace::new(&[p.a, p.a, p.i3, p.o3, p.t2]).with_serial(2);
        self.partitioner.for_each(&space, |idx| {
            let (ha, wa, i3, o3, t2) = (idx[0], idx[1], idx[2], idx[3], idx[4]);
            // SAFETY: (hA, wA, O3, t2) owns one output slice; I3 is serial.
            unsafe { self.gemm(&ops, t2, ha, wa, o3, i3) };
        });
        self.stats.record_kernel_calls(space.len() as u64);
        self.stats.record_execution();
        Ok(())
    }

    /// Tile-parallel schedule: each thread takes a range of `t2` tiles and
    /// walks every `(hA, wA)`, optionally starting at a per-thread offset.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_tiled(
        &self,
        toutput: &mut [O],
        tinput: &[u8],
        tweights: &[i8],
        weights_scale: &[f32],
        weights_factor: &[f32],
        src: SrcSample<'_>,
        i4: usize,
        scramble: Scramble,
    ) -> Result<()> {
        let ops = self.check(toutput, tinput, tweights, weights_scale, weights_factor, src, i4)?;
        let p = &self.params;
        let rotate = self.scrambles(scramble);
        let coords = p.a * p.a;
        let space = IterSpace::new(&[p.t2]);
        self.partitioner.for_each_with_thread(&space, |tid, idx| {
            let t2 = idx[0];
            let offset = if rotate { tid % coords } else { 0 };
            for k in 0..coords {
                let c = (k + offset) % coords;
                let (ha, wa) = (c / p.a, c % p.a);
                for o3 in 0..p.o3 {
                    for i3 in 0..p.i3 {
                        // SAFETY: t2 owns every output slice it touches.
                        unsafe { self.gemm(&ops, t2, ha, wa, o3, i3) };
                    }
                }
            }
        });
        self.stats
            .record_kernel_calls((p.t2 * coords * p.o3 * p.i3) as u64);
        self.stats.record_execution();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check<'a>(
        &self,
        toutput: &'a mut [O],
        tinput: &'a [u8],
        tweights: &'a [i8],
        scale: &'a [f32],
        factor: &'a [f32],
        src: SrcSample<'a>,
        i4: usize,
    ) -> Result<Operands<'a, O>> {
        let p = &self.params;
        if i4 >= p.i4 {
            return Err(ConvError::InvalidDimension(format!("I4 index {} out of 0..{}", i4, p.i4)));
        }
        check_len("toutput", p.toutput_len(), toutput.len())?;
        check_len("tinput", p.tinput_len(), tinput.len())?;
        check_len("tweights", p.tweights_len(), tweights.len())?;
        if scale.len() != p.scale_len() || factor.len() != p.scale_len() {
            return Err(ConvError::ScaleTensor(format!(
                "expected {} entries, got scale={} factor={}",
                p.scale_len(),
                scale.len(),
                factor.len()
            )));
        }
        match (p.sampling, src) {
            (SamplingKind::Calibrated, SrcSample::None) | (SamplingKind::Coarse, SrcSample::Scalar { .. }) => {}
            (SamplingKind::Fine, SrcSample::PerTile(s)) if s.len() == p.src_scale_len() => {}
            (kind, _) => {
                return Err(ConvError::ScaleTensor(format!(
                    "source sampling does not match {:?} (expected {} entries)",
                    kind,
                    p.src_scale_len()
                )));
            }
        }
        Ok(Operands {
            toutput: SharedMut::new(toutput),
            tinput,
            tweights,
            scale,
            factor,
            src,
            i4,
        })
    }

    /// One kernel call for `(t2, hA, wA, O3, I3)`.
    ///
    /// # Safety
    /// The calling thread must own the `(t2, hA, wA, O3)` output slice.
    #[inline]
    unsafe fn gemm(&self, ops: &Operands<'_, O>, t2: usize, ha: usize, wa: usize, o3: usize, i3: usize) {
        let p = &self.params;
        let (a, v, t) = (p.a, p.v, p.t);
        let out_len = p.o2 * t * v;
        let in_len = p.i2 * t * v;
        let w_len = p.o2 * p.i2 * v * v;
        let s_len = p.o2 * v;

        let out_off = (((t2 * a + ha) * a + wa) * p.o3 + o3) * out_len;
        let in_off = (((t2 * a + ha) * a + wa) * p.i3 + i3) * in_len;
        let w_off = (((o3 * p.i3 + i3) * a + ha) * a + wa) * w_len;
        let s_off = ((o3 * a + ha) * a + wa) * s_len;

        let src = match ops.src {
            SrcSample::None => SrcTile::Folded,
            SrcSample::Scalar { scale, zero } => SrcTile::Uniform { scale, zero },
            SrcSample::PerTile(s) => {
                let base = ((((t2 * a + ha) * a + wa) * p.i3 + i3) * 2) * t;
                SrcTile::Rows {
                    scale: &s[base..base + t],
                    zero: &s[base + t..base + 2 * t],
                }
            }
        };
        let mut call = GemmCall {
            p,
            output: ops.toutput.slice_mut(out_off, out_len),
            input: &ops.tinput[in_off..in_off + in_len],
            weights: &ops.tweights[w_off..w_off + w_len],
            scale: &ops.scale[s_off..s_off + s_len],
            factor: &ops.factor[s_off..s_off + s_len],
            src,
            attr: KernelAttr::reduction_step(i3, p.i3, ops.i4, p.i4, p.ir, p.v),
        };
        self.kernels.select(p, t2)(&mut call);
    }
}

impl<O: Element> std::fmt::Debug for WinoGemm<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WinoGemm").field("params", &self.params).finish()
    }
}
