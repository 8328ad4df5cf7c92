//! Layout descriptors: how a logical `(n, channel, h, w)` tensor maps onto a
//! flat buffer for each supported format.
//!
//! Channels are always addressed as `(block, lane)` with `V` lanes per block.
//! The last block of an axis holds `remainder(c, V)` valid lanes, which is
//! never zero.

/// Physical arrangement of an activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// `[n][g][C/V][h][w][V]`, channel blocks padded to `V` lanes (nChw16c style).
    Blocked,
    /// `[n][h][w][g][c]` (nhwc).
    ChannelLast,
    /// `[n][g][c][h][w]` (nchw). Accepted for input only.
    ChannelFirst,
}

/// Numeric kinds a buffer can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    U8,
    I8,
    I32,
}

impl DataType {
    pub fn size(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 => 2,
            DataType::U8 | DataType::I8 => 1,
        }
    }
}

pub fn div_up(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// Valid lanes in the last block of a `c`-wide axis split into `v`-wide blocks.
pub fn remainder(c: usize, v: usize) -> usize {
    match c % v {
        0 => v,
        r => r,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActLayout {
    pub format: Format,
    pub n: usize,
    pub g: usize,
    /// Channels per group.
    pub c: usize,
    pub h: usize,
    pub w: usize,
    pub v: usize,
}

impl ActLayout {
    pub fn new(format: Format, n: usize, g: usize, c: usize, h: usize, w: usize, v: usize) -> Self {
        Self {
            format,
            n,
            g,
            c,
            h,
            w,
            v,
        }
    }

    pub fn blocks(&self) -> usize {
        div_up(self.c, self.v)
    }

    pub fn remainder(&self) -> usize {
        remainder(self.c, self.v)
    }

    /// Valid lanes of channel block `cb`.
    pub fn lanes(&self, cb: usize) -> usize {
        if cb + 1 == self.blocks() {
            self.remainder()
        } else {
            self.v
        }
    }

    /// Number of elements the tensor occupies, padding included.
    pub fn len(&self) -> usize {
        match self.format {
            Format::Blocked => self.n * self.g * self.blocks() * self.h * self.w * self.v,
            Format::ChannelLast | Format::ChannelFirst => {
                self.n * self.g * self.c * self.h * self.w
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of lane 0 of channel block `cb` at pixel `(y, x)`.
    #[inline]
    pub fn offset(&self, n: usize, g: usize, cb: usize, y: usize, x: usize) -> usize {
        match self.format {
            Format::Blocked => {
                ((((n * self.g + g) * self.blocks() + cb) * self.h + y) * self.w + x) * self.v
            }
            Format::ChannelLast => {
                (((n * self.h + y) * self.w + x) * self.g + g) * self.c + cb * self.v
            }
            Format::ChannelFirst => {
                (((n * self.g + g) * self.c + cb * self.v) * self.h + y) * self.w + x
            }
        }
    }

    /// Distance between consecutive lanes of one block.
    #[inline]
    pub fn lane_stride(&self) -> usize {
        match self.format {
            Format::Blocked | Format::ChannelLast => 1,
            Format::ChannelFirst => self.h * self.w,
        }
    }

    /// Distance between horizontally adjacent pixels.
    #[inline]
    pub fn pixel_stride(&self) -> usize {
        match self.format {
            Format::Blocked => self.v,
            Format::ChannelLast => self.g * self.c,
            Format::ChannelFirst => 1,
        }
    }

    /// Same buffer seen as a single row of `h * w` pixels. Valid for every
    /// format because rows are contiguous in pixel order.
    pub fn flatten_spatial(&self) -> Self {
        Self {
            h: 1,
            w: self.h * self.w,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightFormat {
    /// `[g*oc][ic][kh][kw]`.
    Oihw,
    /// `[g][OC/V][IC/V][kh][kw][Vi][Vo]` (OIhw16i16o style), padded lanes.
    Blocked,
}

/// Raw (caller-supplied) weight tensor layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightLayout {
    pub format: WeightFormat,
    pub g: usize,
    pub oc: usize,
    pub ic: usize,
    pub kh: usize,
    pub kw: usize,
    pub v: usize,
}

impl WeightLayout {
    pub fn len(&self) -> usize {
        let k = self.kh * self.kw;
        match self.format {
            WeightFormat::Oihw => self.g * self.oc * self.ic * k,
            WeightFormat::Blocked => {
                self.g * div_up(self.oc, self.v) * div_up(self.ic, self.v) * k * self.v * self.v
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of the logical element `(g, o, i, y, x)`; `o < oc`, `i < ic`.
    #[inline]
    pub fn offset(&self, g: usize, o: usize, i: usize, y: usize, x: usize) -> usize {
        match self.format {
            WeightFormat::Oihw => (((g * self.oc + o) * self.ic + i) * self.kh + y) * self.kw + x,
            WeightFormat::Blocked => {
                let v = self.v;
                let ob = div_up(self.oc, v);
                let ib = div_up(self.ic, v);
                let blk = (((g * ob + o / v) * ib + i / v) * self.kh + y) * self.kw + x;
                (blk * v + i % v) * v + o % v
            }
        }
    }
}
