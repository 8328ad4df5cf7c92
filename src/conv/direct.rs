//! Direct convolution instance: packs weights, partitions tiles over the
//! pool and runs the bound micro-kernels.

use crate::conv::combine::{combine_row, store_partial, store_tile, TilePos};
use crate::conv::compact::{PackState, PackedWeights};
use crate::conv::partition::{IterSpace, Partitioner};
use crate::error::{check_len, ConvError, Result};
use crate::kernels::attr::KernelAttr;
use crate::kernels::direct::DirectCall;
use crate::kernels::dispatch::{DirectKernels, SimdLevel};
use crate::kernels::utils::ensure_capacity;
use crate::layout::{ActLayout, Format};
use crate::params::{Algorithm, ConvParams};
use crate::stats::ExecStats;
use crate::tensor::{Element, TensorViewMut};
use std::cell::RefCell;
use std::marker::PhantomData;

thread_local! {
    static TILE_ACC: RefCell<Vec<f32>> = const { RefCell::new(Vec::new()) };
}

pub struct DirectConv<O: Element = f32> {
    params: ConvParams,
    kernels: DirectKernels,
    partitioner: Partitioner,
    packed: PackedWeights,
    toutput: Vec<f32>,
    stats: ExecStats,
    _out: PhantomData<O>,
}

impl<O: Element> DirectConv<O> {
    pub fn new(params: ConvParams) -> Result<Self> {
        Self::with_simd(params, SimdLevel::detect())
    }

    /// Binds kernels for `level` (scalar when unavailable on this CPU).
    pub fn with_simd(params: ConvParams, level: SimdLevel) -> Result<Self> {
        if params.output_type != O::DTYPE {
            return Err(ConvError::UnsupportedDataType {
                expected: params.output_type,
                found: O::DTYPE,
            });
        }
        let kernels = DirectKernels::bind_with(&params, level)?;
        let partitioner = Partitioner::new(params.nthreads)?;
        Ok(Self {
            packed: PackedWeights::new(&params),
            toutput: vec![0.0; params.toutput_len()],
            kernels,
            partitioner,
            params,
            stats: ExecStats::default(),
            _out: PhantomData,
        })
    }

    pub fn params(&self) -> &ConvParams {
        &self.params
    }

    pub fn stats(&self) -> &ExecStats {
        &self.stats
    }

    pub fn pack_state(&self) -> PackState {
        self.packed.state()
    }

    /// Drops the packed weights so the next `execute` repacks from its
    /// `weights` argument, also under `inference_acc`.
    pub fn invalidate_weights(&mut self) {
        self.packed.invalidate();
    }

    pub fn simd_level(&self) -> SimdLevel {
        self.kernels.level
    }

    /// `output = act(conv(input, weights) + bias)`.
    ///
    /// Buffers are checked before any write. With `inference_acc` the
    /// weights are packed on the first call only; later calls reuse them
    /// and ignore the `weights` contents.
    pub fn execute(&mut self, output: &mut [O], input: &[f32], weights: &[f32], bias: Option<&[f32]>) -> Result<()> {
        let p = &self.params;
        check_len("input", p.input_layout().len(), input.len())?;
        check_len("output", p.output_layout().len(), output.len())?;
        check_len("weights", p.weight_layout().len(), weights.len())?;
        let bias = match (p.with_bias, bias) {
            (true, Some(b)) => {
                check_len("bias", p.bias_len(), b.len())?;
                Some(b)
            }
            (true, None) => {
                return Err(ConvError::InvalidDimension("bias expected but not supplied".into()));
            }
            (false, _) => None,
        };

        if !p.inference_acc || self.packed.state() == PackState::Unpacked {
            self.packed.compact(p, weights, &self.partitioner)?;
            self.stats.record_pack();
        }

        match p.algorithm {
            Algorithm::Direct | Algorithm::Gemm1x1 => self.run_flat(output, input, bias),
            Algorithm::DirectSplit => self.run_split(output, input, bias),
        }
        self.stats.record_execution();
        Ok(())
    }

    /// Flat partition over `(n, g, I4*, O4, ht, wt)`.
    fn run_flat(&self, output: &mut [O], input: &[f32], bias: Option<&[f32]>) {
        let p = &self.params;
        let in_layout = p.kernel_input_layout();
        let out = TensorViewMut::new(output, p.kernel_output_layout());
        let space = IterSpace::new(&[p.n, p.g, p.i4, p.o4, p.ht, p.wt]).with_serial(2);
        let tile_len = DirectCall::tile_len(p);
        let kernels = self.kernels;
        let packed = &self.packed;

        self.partitioner.for_each(&space, |idx| {
            let (n, g, i4, o4, ht, wt) = (idx[0], idx[1], idx[2], idx[3], idx[4], idx[5]);
            let attr = KernelAttr::step(i4 == 0, i4 + 1 == p.i4, p.ir, p.v);
            TILE_ACC.with(|acc| {
                let mut acc = acc.borrow_mut();
                ensure_capacity(&mut acc, tile_len);
                let mut call = DirectCall {
                    p,
                    input,
                    layout: in_layout,
                    weights: packed.slice(p, g, o4, i4),
                    acc: &mut acc[..tile_len],
                    n,
                    g,
                    oh: ht,
                    ow0: wt * p.t,
                    ib0: i4 * p.i3 * p.i2,
                    i3: 0..p.i3,
                    attr,
                };
                // SAFETY: the binder only returns kernels this CPU supports.
                unsafe { kernels.select(p, wt)(&mut call) };
                if attr.contains(KernelAttr::RESTORE_OUTPUT) {
                    let pos = TilePos {
                        n,
                        g,
                        o4,
                        oh: ht,
                        ow0: wt * p.t,
                        cols: p.tile_cols(wt),
                    };
                    // SAFETY: (n, g, o4, ht, wt) owns a disjoint output tile.
                    unsafe { store_tile(p, &acc, &out, bias, pos) };
                }
            });
        });
        self.stats.record_kernel_calls(space.len() as u64);
    }

    /// Split reduction: producers over `(I4, n, g, I3*, O4, ht, wt)` into the
    /// reduction buffer, barrier, combiner over `(n, g, OB, oh)`.
    fn run_split(&mut self, output: &mut [O], input: &[f32], bias: Option<&[f32]>) {
        let p = &self.params;
        let in_layout = p.input_layout();
        let out = TensorViewMut::new(output, p.output_layout());
        let tlayout = ActLayout::new(Format::Blocked, p.i4 * p.n, p.g, p.oc, p.oh, p.ow, p.v);
        let toutput = TensorViewMut::new(&mut self.toutput, tlayout);
        let producers = IterSpace::new(&[p.i4, p.n, p.g, p.i3, p.o4, p.ht, p.wt]).with_serial(3);
        let combiner = IterSpace::new(&[p.n, p.g, p.ob, p.oh]);
        let tile_len = DirectCall::tile_len(p);
        let kernels = self.kernels;
        let packed = &self.packed;

        self.partitioner.split_reduction(
            &producers,
            |idx| {
                let (i4, n, g, i3, o4, ht, wt) = (idx[0], idx[1], idx[2], idx[3], idx[4], idx[5], idx[6]);
                let last = i3 + 1 == p.i3;
                let attr = KernelAttr::step(i3 == 0, last, if i4 + 1 == p.i4 { p.ir } else { p.v }, p.v);
                TILE_ACC.with(|acc| {
                    let mut acc = acc.borrow_mut();
                    ensure_capacity(&mut acc, tile_len);
                    let mut call = DirectCall {
                        p,
                        input,
                        layout: in_layout,
                        weights: packed.slice(p, g, o4, i4),
                        acc: &mut acc[..tile_len],
                        n,
                        g,
                        oh: ht,
                        ow0: wt * p.t,
                        ib0: i4 * p.i3 * p.i2,
                        i3: i3..i3 + 1,
                        attr,
                    };
                    // SAFETY: see `run_flat`.
                    unsafe { kernels.select(p, wt)(&mut call) };
                    if last {
                        let pos = TilePos {
                            n,
                            g,
                            o4,
                            oh: ht,
                            ow0: wt * p.t,
                            cols: p.tile_cols(wt),
                        };
                        // SAFETY: (i4, n, g, o4, ht, wt) owns a disjoint buffer tile.
                        unsafe { store_partial(p, &acc, &toutput, i4, pos) };
                    }
                });
            },
            &combiner,
            |idx| {
                // SAFETY: producers are done; (n, g, ob, oh) owns one output row.
                unsafe { combine_row(p, &toutput, &out, bias, idx[0], idx[1], idx[2], idx[3]) };
            },
        );
        self.stats.record_kernel_calls(producers.len() as u64);
        self.stats.record_combined(combiner.len() as u64 * p.ow as u64);
    }
}

impl<O: Element> std::fmt::Debug for DirectConv<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectConv")
            .field("params", &self.params)
            .field("kernels", &self.kernels)
            .field("pack_state", &self.packed.state())
            .finish()
    }
}
