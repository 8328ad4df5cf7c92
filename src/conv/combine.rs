//! Output epilogues: tile store for the flat paths, partial-sum store and
//! the cross-`I4` combiner for the split-reduction path.

use crate::kernels::activations::clamp_opt;
use crate::layout::Format;
use crate::params::ConvParams;
use crate::tensor::{Element, TensorViewMut};

/// Destination of one output tile.
#[derive(Debug, Clone, Copy)]
pub struct TilePos {
    pub n: usize,
    pub g: usize,
    pub o4: usize,
    pub oh: usize,
    pub ow0: usize,
    pub cols: usize,
}

/// Writes `v` valid-or-padded lanes of one output vector: `lanes` values
/// from `vals` through bias and clamp, zeros in the padded lanes of a
/// blocked tensor.
#[inline(always)]
unsafe fn store_vector<O: Element>(
    p: &ConvParams,
    out: &TensorViewMut<'_, O>,
    base: usize,
    vals: &[f32],
    bias: Option<&[f32]>,
    lanes: usize,
) {
    let act = p.activation.as_ref();
    for (lane, &x) in vals[..lanes].iter().enumerate() {
        let b = bias.map_or(0.0, |b| b[lane]);
        out.buf.write(base + lane, O::from_f32(clamp_opt(act, x + b)));
    }
    if out.layout.format == Format::Blocked {
        for lane in lanes..p.v {
            out.buf.write(base + lane, O::default());
        }
    }
}

/// Final store of an accumulated tile `[O3 * O2][T][V]`.
///
/// # Safety
/// The tile region of `out` must be owned by the calling thread.
pub unsafe fn store_tile<O: Element>(
    p: &ConvParams,
    acc: &[f32],
    out: &TensorViewMut<'_, O>,
    bias: Option<&[f32]>,
    pos: TilePos,
) {
    let v = p.v;
    for blk in 0..p.o3 * p.o2 {
        let ob = pos.o4 * p.o3 * p.o2 + blk;
        let lanes = out.layout.lanes(ob);
        let bias = bias.map(|b| &b[pos.g * p.oc + ob * v..pos.g * p.oc + ob * v + lanes]);
        for t in 0..pos.cols {
            let base = out.layout.offset(pos.n, pos.g, ob, pos.oh, pos.ow0 + t);
            let vals = &acc[(blk * p.t + t) * v..(blk * p.t + t + 1) * v];
            store_vector(p, out, base, vals, bias, lanes);
        }
    }
}

/// Stores raw partial sums of one `I4` slice into the reduction buffer.
///
/// # Safety
/// Same contract as [`store_tile`].
pub unsafe fn store_partial(p: &ConvParams, acc: &[f32], toutput: &TensorViewMut<'_, f32>, i4: usize, pos: TilePos) {
    let v = p.v;
    for blk in 0..p.o3 * p.o2 {
        let ob = pos.o4 * p.o3 * p.o2 + blk;
        for t in 0..pos.cols {
            let base = toutput.layout.offset(i4 * p.n + pos.n, pos.g, ob, pos.oh, pos.ow0 + t);
            let src = &acc[(blk * p.t + t) * v..(blk * p.t + t + 1) * v];
            toutput.buf.slice_mut(base, v).copy_from_slice(src);
        }
    }
}

/// Sums one output row of every `I4` slice in order `0..I4`, then applies
/// bias and clamp and writes `Or` lanes on the last block.
///
/// # Safety
/// Every producer must have finished; the row of `out` must be owned by
/// the calling thread.
#[allow(clippy::too_many_arguments)]
pub unsafe fn combine_row<O: Element>(
    p: &ConvParams,
    toutput: &TensorViewMut<'_, f32>,
    out: &TensorViewMut<'_, O>,
    bias: Option<&[f32]>,
    n: usize,
    g: usize,
    ob: usize,
    oh: usize,
) {
    let v = p.v;
    let lanes = out.layout.lanes(ob);
    let bias = bias.map(|b| &b[g * p.oc + ob * v..g * p.oc + ob * v + lanes]);
    let mut sum = [0.0f32; 16];
    for ow in 0..p.ow {
        sum[..v].fill(0.0);
        for i4 in 0..p.i4 {
            let base = toutput.layout.offset(i4 * p.n + n, g, ob, oh, ow);
            for (lane, s) in sum[..v].iter_mut().enumerate() {
                *s += toutput.buf.read(base + lane);
            }
        }
        let dst = out.layout.offset(n, g, ob, oh, ow);
        store_vector(p, out, dst, &sum[..v], bias, lanes);
    }
}
