//! Weight compactor: raw `Oihw` / blocked weights into the kernel-friendly
//! `[g][O4][I4][O3][I3][O2][I2][kh][kw][Vi][Vo]` nesting.

use crate::conv::partition::Partitioner;
use crate::error::{check_len, Result};
use crate::params::ConvParams;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackState {
    Unpacked,
    Packed,
}

#[derive(Debug)]
pub struct PackedWeights {
    data: Vec<f32>,
    slice_len: usize,
    state: PackState,
}

impl PackedWeights {
    pub fn new(p: &ConvParams) -> Self {
        let slice_len = Self::slice_len(p);
        Self {
            data: vec![0.0; p.g * p.o4 * p.i4 * slice_len],
            slice_len,
            state: PackState::Unpacked,
        }
    }

    /// Elements of one `(g, O4, I4)` slice.
    pub fn slice_len(p: &ConvParams) -> usize {
        p.o3 * p.i3 * p.o2 * p.i2 * p.kh * p.kw * p.v * p.v
    }

    pub fn state(&self) -> PackState {
        self.state
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn slice(&self, p: &ConvParams, g: usize, o4: usize, i4: usize) -> &[f32] {
        let start = ((g * p.o4 + o4) * p.i4 + i4) * self.slice_len;
        &self.data[start..start + self.slice_len]
    }

    pub fn invalidate(&mut self) {
        self.state = PackState::Unpacked;
    }

    /// Packs `raw`, one `(g, O4, I4)` slice per work item. Lanes past the
    /// true channel counts are zero.
    pub fn compact(&mut self, p: &ConvParams, raw: &[f32], partitioner: &Partitioner) -> Result<()> {
        let wl = p.weight_layout();
        check_len("weights", wl.len(), raw.len())?;
        let v = p.v;
        let (kh, kw) = (p.kh, p.kw);
        partitioner.install(|| {
            self.data
                .par_chunks_mut(self.slice_len)
                .enumerate()
                .for_each(|(slice, dst)| {
                    let i4 = slice % p.i4;
                    let o4 = (slice / p.i4) % p.o4;
                    let g = slice / (p.i4 * p.o4);
                    let mut off = 0;
                    for o3 in 0..p.o3 {
                        for i3 in 0..p.i3 {
                            for o2 in 0..p.o2 {
                                for i2 in 0..p.i2 {
                                    let ob = (o4 * p.o3 + o3) * p.o2 + o2;
                                    let ib = (i4 * p.i3 + i3) * p.i2 + i2;
                                    for y in 0..kh {
                                        for x in 0..kw {
                                            for vi in 0..v {
                                                let i = ib * v + vi;
                                                for vo in 0..v {
                                                    let o = ob * v + vo;
                                                    dst[off] = if i < p.ic && o < p.oc {
                                                        raw[wl.offset(g, o, i, y, x)]
                                                    } else {
                                                        0.0
                                                    };
                                                    off += 1;
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                });
        });
        self.state = PackState::Packed;
        Ok(())
    }
}
