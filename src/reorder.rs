//! Conversions between plain `nchw` / `oihw` buffers and the engine layouts.

use crate::layout::{ActLayout, WeightFormat, WeightLayout};
use crate::tensor::{Element, TensorView};

/// Scatters a plain `[n][g*c][h][w]` tensor into `layout`. Padded lanes of a
/// blocked layout are set to zero.
pub fn reorder_from_nchw(src: &[f32], layout: &ActLayout) -> Vec<f32> {
    let l = layout;
    assert_eq!(src.len(), l.n * l.g * l.c * l.h * l.w, "reorder_from_nchw: size mismatch");
    let mut dst = vec![0.0f32; l.len()];
    let ls = l.lane_stride();
    for n in 0..l.n {
        for g in 0..l.g {
            for cb in 0..l.blocks() {
                for y in 0..l.h {
                    for x in 0..l.w {
                        let base = l.offset(n, g, cb, y, x);
                        for lane in 0..l.lanes(cb) {
                            let c = g * l.c + cb * l.v + lane;
                            dst[base + lane * ls] = src[((n * l.g * l.c + c) * l.h + y) * l.w + x];
                        }
                    }
                }
            }
        }
    }
    dst
}

/// Gathers `src` (in `layout`) back into a plain `[n][g*c][h][w]` f32 tensor.
pub fn reorder_to_nchw<T: Element>(src: &[T], layout: &ActLayout) -> Vec<f32> {
    let view = TensorView::new(src, *layout);
    let l = layout;
    let mut dst = vec![0.0f32; l.n * l.g * l.c * l.h * l.w];
    for n in 0..l.n {
        for g in 0..l.g {
            for cb in 0..l.blocks() {
                for y in 0..l.h {
                    for x in 0..l.w {
                        for lane in 0..l.lanes(cb) {
                            let c = g * l.c + cb * l.v + lane;
                            dst[((n * l.g * l.c + c) * l.h + y) * l.w + x] = view.at(n, g, cb, y, x, lane).to_f32();
                        }
                    }
                }
            }
        }
    }
    dst
}

/// `oihw` weights into the blocked `[g][OB][IB][kh][kw][Vi][Vo]` layout.
pub fn reorder_weights_blocked(src: &[f32], layout: &WeightLayout) -> Vec<f32> {
    let plain = WeightLayout {
        format: WeightFormat::Oihw,
        ..*layout
    };
    assert_eq!(src.len(), plain.len(), "reorder_weights_blocked: size mismatch");
    let mut dst = vec![0.0f32; layout.len()];
    for g in 0..layout.g {
        for o in 0..layout.oc {
            for i in 0..layout.ic {
                for y in 0..layout.kh {
                    for x in 0..layout.kw {
                        dst[layout.offset(g, o, i, y, x)] = src[plain.offset(g, o, i, y, x)];
                    }
                }
            }
        }
    }
    dst
}
