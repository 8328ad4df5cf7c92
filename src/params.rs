//! Convolution descriptors and the validated parameter sets derived from them.
//!
//! A [`ConvDesc`] is filled in by the caller (fluent setters or public
//! fields) and turned into an immutable [`ConvParams`] by
//! [`ConvDesc::setup`]. Execution never re-validates what `setup` accepted.
//!
//! ```
//! use blockconv::params::{Algorithm, ConvDesc};
//! use blockconv::layout::Format;
//!
//! let params = ConvDesc::new(1, 16, 16, (4, 4), (3, 3))
//!     .pads(1, 1, 1, 1)
//!     .formats(Format::Blocked, Format::Blocked)
//!     .algorithm(Algorithm::Direct)
//!     .setup()
//!     .unwrap();
//! assert_eq!((params.oh, params.ow), (4, 4));
//! assert_eq!(params.ir, 16);
//! ```

use crate::error::{ConvError, Result};
use crate::kernels::activations::Activation;
use crate::kernels::dispatch::{MAX_DIRECT_TILE, MAX_GEMM_TILE};
use crate::layout::{div_up, remainder, ActLayout, DataType, Format, WeightFormat, WeightLayout};
use crate::quantization::SamplingKind;

/// Execution path of the direct engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Flat partition over `(n, g, I4*, O4, ht, wt)`; the input-channel
    /// groups are reduced sequentially inside one work item.
    Direct,
    /// `I4` becomes a parallel axis writing a temporary reduction buffer,
    /// followed by a barrier and a combining pass.
    DirectSplit,
    /// 1x1, unit stride, unpadded convolution computed as a GEMM over the
    /// flattened spatial plane.
    Gemm1x1,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvDesc {
    pub n: usize,
    pub g: usize,
    /// Input channels per group.
    pub ic: usize,
    /// Output channels per group.
    pub oc: usize,
    pub ih: usize,
    pub iw: usize,
    pub kh: usize,
    pub kw: usize,
    /// `(h, w)`.
    pub strides: (usize, usize),
    /// `(top, left, bottom, right)`.
    pub pads: (usize, usize, usize, usize),
    pub input_format: Format,
    pub output_format: Format,
    pub weights_format: WeightFormat,
    pub v: usize,
    pub algorithm: Algorithm,
    pub i4: Option<usize>,
    pub i2: Option<usize>,
    pub o4: Option<usize>,
    pub o2: Option<usize>,
    pub tile_width: Option<usize>,
    pub activation: Option<Activation>,
    pub with_bias: bool,
    pub output_type: DataType,
    /// Pack weights once and reuse them on later calls.
    pub inference_acc: bool,
    pub nthreads: Option<usize>,
}

impl Default for ConvDesc {
    fn default() -> Self {
        Self::new(1, 16, 16, (1, 1), (1, 1))
    }
}

impl ConvDesc {
    pub fn new(n: usize, ic: usize, oc: usize, input_hw: (usize, usize), kernel_hw: (usize, usize)) -> Self {
        Self {
            n,
            g: 1,
            ic,
            oc,
            ih: input_hw.0,
            iw: input_hw.1,
            kh: kernel_hw.0,
            kw: kernel_hw.1,
            strides: (1, 1),
            pads: (0, 0, 0, 0),
            input_format: Format::Blocked,
            output_format: Format::Blocked,
            weights_format: WeightFormat::Oihw,
            v: 16,
            algorithm: Algorithm::Direct,
            i4: None,
            i2: None,
            o4: None,
            o2: None,
            tile_width: None,
            activation: None,
            with_bias: true,
            output_type: DataType::F32,
            inference_acc: true,
            nthreads: None,
        }
    }

    pub fn groups(mut self, g: usize) -> Self {
        self.g = g;
        self
    }

    pub fn strides(mut self, sh: usize, sw: usize) -> Self {
        self.strides = (sh, sw);
        self
    }

    pub fn pads(mut self, top: usize, left: usize, bottom: usize, right: usize) -> Self {
        self.pads = (top, left, bottom, right);
        self
    }

    pub fn formats(mut self, input: Format, output: Format) -> Self {
        self.input_format = input;
        self.output_format = output;
        self
    }

    pub fn weights_format(mut self, format: WeightFormat) -> Self {
        self.weights_format = format;
        self
    }

    pub fn vector_width(mut self, v: usize) -> Self {
        self.v = v;
        self
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Number of independent input-channel groups (`I4`).
    pub fn reduction_split(mut self, i4: usize) -> Self {
        self.i4 = Some(i4);
        self
    }

    pub fn blocking(mut self, i2: usize, o4: usize, o2: usize) -> Self {
        self.i2 = Some(i2);
        self.o4 = Some(o4);
        self.o2 = Some(o2);
        self
    }

    pub fn tile_width(mut self, t: usize) -> Self {
        self.tile_width = Some(t);
        self
    }

    pub fn activation(mut self, act: Activation) -> Self {
        self.activation = Some(act);
        self
    }

    pub fn bias(mut self, with_bias: bool) -> Self {
        self.with_bias = with_bias;
        self
    }

    pub fn output_type(mut self, dtype: DataType) -> Self {
        self.output_type = dtype;
        self
    }

    pub fn inference_acc(mut self, enabled: bool) -> Self {
        self.inference_acc = enabled;
        self
    }

    pub fn threads(mut self, nthreads: usize) -> Self {
        self.nthreads = Some(nthreads);
        self
    }

    pub fn setup(&self) -> Result<ConvParams> {
        if self.n == 0 || self.g == 0 || self.ic == 0 || self.oc == 0 {
            return Err(ConvError::InvalidDimension(format!(
                "n={} g={} ic={} oc={} must be non-zero",
                self.n, self.g, self.ic, self.oc
            )));
        }
        if self.ih == 0 || self.iw == 0 || self.kh == 0 || self.kw == 0 {
            return Err(ConvError::InvalidDimension(format!(
                "input {}x{} / kernel {}x{} must be non-zero",
                self.ih, self.iw, self.kh, self.kw
            )));
        }
        if !matches!(self.v, 4 | 8 | 16) {
            return Err(ConvError::Blocking(format!("vector width {} not in {{4, 8, 16}}", self.v)));
        }
        let (sh, sw) = self.strides;
        if sh == 0 || sw == 0 {
            return Err(ConvError::InvalidDimension("stride must be non-zero".into()));
        }
        let (pt, pl, pb, pr) = self.pads;
        let padded_h = self.ih + pt + pb;
        let padded_w = self.iw + pl + pr;
        if padded_h < self.kh || padded_w < self.kw {
            return Err(ConvError::InvalidDimension(format!(
                "kernel {}x{} larger than padded input {}x{}",
                self.kh, self.kw, padded_h, padded_w
            )));
        }
        let oh = (padded_h - self.kh) / sh + 1;
        let ow = (padded_w - self.kw) / sw + 1;

        if self.output_format == Format::ChannelFirst {
            return Err(ConvError::UnsupportedFormat {
                input: self.input_format,
                output: self.output_format,
                reason: "channel-first layout is accepted for input only",
            });
        }
        if !matches!(self.output_type, DataType::F32 | DataType::F16) {
            return Err(ConvError::UnsupportedDataType {
                expected: DataType::F32,
                found: self.output_type,
            });
        }
        if let Some(act) = self.activation.filter(|a| !a.is_valid()) {
            return Err(ConvError::InvalidDimension(format!(
                "activation bounds [{}, {}] must satisfy lower <= upper",
                act.lower, act.upper
            )));
        }
        if self.algorithm == Algorithm::Gemm1x1
            && (self.kh != 1 || self.kw != 1 || sh != 1 || sw != 1 || self.pads != (0, 0, 0, 0))
        {
            return Err(ConvError::InvalidDimension(
                "Gemm1x1 requires a 1x1 kernel, unit stride and no padding".into(),
            ));
        }

        let v = self.v;
        let ib = div_up(self.ic, v);
        let ob = div_up(self.oc, v);
        let i4 = self.i4.unwrap_or(1);
        let i2 = self.i2.unwrap_or(1);
        let o2 = self.o2.unwrap_or(1);
        if i4 == 0 || i2 == 0 || o2 == 0 || ib % (i4 * i2) != 0 {
            return Err(ConvError::Blocking(format!(
                "{} input blocks not divisible into I4={} x I2={}",
                ib, i4, i2
            )));
        }
        if ob % o2 != 0 {
            return Err(ConvError::Blocking(format!("{} output blocks not divisible by O2={}", ob, o2)));
        }
        let o4 = self.o4.unwrap_or(ob / o2);
        if o4 == 0 || ob % (o4 * o2) != 0 {
            return Err(ConvError::Blocking(format!(
                "{} output blocks not divisible into O4={} x O2={}",
                ob, o4, o2
            )));
        }

        // Tiles run along the output width, or along the whole flattened
        // plane for the 1x1 GEMM path.
        let (ht, cols) = match self.algorithm {
            Algorithm::Gemm1x1 => (1, oh * ow),
            Algorithm::Direct | Algorithm::DirectSplit => (oh, ow),
        };
        let t = self.tile_width.unwrap_or(8).min(cols);
        if t == 0 || t > MAX_DIRECT_TILE {
            return Err(ConvError::UnsupportedTile {
                width: t,
                max: MAX_DIRECT_TILE,
            });
        }
        let wt = div_up(cols, t);
        let tr = cols - (wt - 1) * t;

        let nthreads = match self.nthreads {
            Some(0) => return Err(ConvError::InvalidDimension("thread count must be non-zero".into())),
            Some(n) => n,
            None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        };

        Ok(ConvParams {
            n: self.n,
            g: self.g,
            ic: self.ic,
            oc: self.oc,
            ih: self.ih,
            iw: self.iw,
            oh,
            ow,
            kh: self.kh,
            kw: self.kw,
            sh,
            sw,
            pt,
            pl,
            v,
            ib,
            i2,
            i3: ib / (i4 * i2),
            i4,
            ob,
            o2,
            o3: ob / (o4 * o2),
            o4,
            ir: remainder(self.ic, v),
            or: remainder(self.oc, v),
            t,
            tr,
            ht,
            wt,
            input_format: self.input_format,
            output_format: self.output_format,
            weights_format: self.weights_format,
            algorithm: self.algorithm,
            activation: self.activation,
            with_bias: self.with_bias,
            output_type: self.output_type,
            inference_acc: self.inference_acc,
            nthreads,
        })
    }
}

/// Validated, immutable configuration of one convolution instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams {
    pub n: usize,
    pub g: usize,
    pub ic: usize,
    pub oc: usize,
    pub ih: usize,
    pub iw: usize,
    pub oh: usize,
    pub ow: usize,
    pub kh: usize,
    pub kw: usize,
    pub sh: usize,
    pub sw: usize,
    pub pt: usize,
    pub pl: usize,
    pub v: usize,
    /// Input channel blocks per group, `I4 * I3 * I2`.
    pub ib: usize,
    pub i2: usize,
    pub i3: usize,
    pub i4: usize,
    /// Output channel blocks per group, `O4 * O3 * O2`.
    pub ob: usize,
    pub o2: usize,
    pub o3: usize,
    pub o4: usize,
    pub ir: usize,
    pub or: usize,
    pub t: usize,
    pub tr: usize,
    pub ht: usize,
    pub wt: usize,
    pub input_format: Format,
    pub output_format: Format,
    pub weights_format: WeightFormat,
    pub algorithm: Algorithm,
    pub activation: Option<Activation>,
    pub with_bias: bool,
    pub output_type: DataType,
    pub inference_acc: bool,
    pub nthreads: usize,
}

impl ConvParams {
    pub fn input_layout(&self) -> ActLayout {
        ActLayout::new(self.input_format, self.n, self.g, self.ic, self.ih, self.iw, self.v)
    }

    pub fn output_layout(&self) -> ActLayout {
        ActLayout::new(self.output_format, self.n, self.g, self.oc, self.oh, self.ow, self.v)
    }

    pub fn weight_layout(&self) -> WeightLayout {
        WeightLayout {
            format: self.weights_format,
            g: self.g,
            oc: self.oc,
            ic: self.ic,
            kh: self.kh,
            kw: self.kw,
            v: self.v,
        }
    }

    /// Input layout as seen by the micro-kernels.
    pub fn kernel_input_layout(&self) -> ActLayout {
        match self.algorithm {
            Algorithm::Gemm1x1 => self.input_layout().flatten_spatial(),
            Algorithm::Direct | Algorithm::DirectSplit => self.input_layout(),
        }
    }

    /// Output layout as seen by the micro-kernels and the tile epilogue.
    pub fn kernel_output_layout(&self) -> ActLayout {
        match self.algorithm {
            Algorithm::Gemm1x1 => self.output_layout().flatten_spatial(),
            Algorithm::Direct | Algorithm::DirectSplit => self.output_layout(),
        }
    }

    pub fn bias_len(&self) -> usize {
        self.g * self.oc
    }

    /// Tile width of spatial tile `wt`.
    #[inline]
    pub fn tile_cols(&self, wt: usize) -> usize {
        if wt + 1 == self.wt {
            self.tr
        } else {
            self.t
        }
    }

    /// Elements of the temporary reduction buffer used by `DirectSplit`:
    /// `[I4][n][g][OB][oh][ow][V]`.
    pub fn toutput_len(&self) -> usize {
        match self.algorithm {
            Algorithm::DirectSplit => {
                self.i4 * self.n * self.g * self.ob * self.oh * self.ow * self.v
            }
            Algorithm::Direct | Algorithm::Gemm1x1 => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WinoGemmDesc {
    /// Transform tile edge (`A = tile + K - 1`).
    pub a: usize,
    pub v: usize,
    pub ic: usize,
    pub oc: usize,
    /// Spatial tiles across the whole batch.
    pub tiles: usize,
    pub t: usize,
    pub i4: usize,
    pub i2: usize,
    pub o2: usize,
    pub o4: usize,
    pub sampling: SamplingKind,
    pub nthreads: Option<usize>,
}

impl WinoGemmDesc {
    pub fn new(a: usize, ic: usize, oc: usize, tiles: usize) -> Self {
        Self {
            a,
            v: 16,
            ic,
            oc,
            tiles,
            t: 8,
            i4: 1,
            i2: 1,
            o2: 1,
            o4: 1,
            sampling: SamplingKind::Coarse,
            nthreads: None,
        }
    }

    pub fn vector_width(mut self, v: usize) -> Self {
        self.v = v;
        self
    }

    pub fn tile_width(mut self, t: usize) -> Self {
        self.t = t;
        self
    }

    pub fn blocking(mut self, i4: usize, i2: usize, o4: usize, o2: usize) -> Self {
        self.i4 = i4;
        self.i2 = i2;
        self.o4 = o4;
        self.o2 = o2;
        self
    }

    pub fn sampling(mut self, sampling: SamplingKind) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn threads(mut self, nthreads: usize) -> Self {
        self.nthreads = Some(nthreads);
        self
    }

    pub fn setup(&self) -> Result<WinoGemmParams> {
        if !(2..=8).contains(&self.a) {
            return Err(ConvError::InvalidDimension(format!("transform tile A={} not in 2..=8", self.a)));
        }
        if self.ic == 0 || self.oc == 0 || self.tiles == 0 {
            return Err(ConvError::InvalidDimension(format!(
                "ic={} oc={} tiles={} must be non-zero",
                self.ic, self.oc, self.tiles
            )));
        }
        if !matches!(self.v, 4 | 8 | 16) {
            return Err(ConvError::Blocking(format!("vector width {} not in {{4, 8, 16}}", self.v)));
        }
        let v = self.v;
        let ib = div_up(self.ic, v);
        let ob = div_up(self.oc, v);
        if self.i4 == 0 || self.i2 == 0 || ib % (self.i4 * self.i2) != 0 {
            return Err(ConvError::Blocking(format!(
                "{} input blocks not divisible into I4={} x I2={}",
                ib, self.i4, self.i2
            )));
        }
        if self.o4 == 0 || self.o2 == 0 || ob % (self.o4 * self.o2) != 0 {
            return Err(ConvError::Blocking(format!(
                "{} output blocks not divisible into O4={} x O2={}",
                ob, self.o4, self.o2
            )));
        }
        let t = self.t.min(self.tiles);
        if t == 0 || t > MAX_GEMM_TILE {
            return Err(ConvError::UnsupportedTile {
                width: t,
                max: MAX_GEMM_TILE,
            });
        }
        let t2 = div_up(self.tiles, t);
        let nthreads = match self.nthreads {
            Some(0) => return Err(ConvError::InvalidDimension("thread count must be non-zero".into())),
            Some(n) => n,
            None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        };
        Ok(WinoGemmParams {
            a: self.a,
            v,
            ic: self.ic,
            ir: remainder(self.ic, v),
            i2: self.i2,
            i3: ib / (self.i4 * self.i2),
            i4: self.i4,
            o2: self.o2,
            o3: ob / (self.o4 * self.o2),
            o4: self.o4,
            t,
            tr: self.tiles - (t2 - 1) * t,
            t2,
            sampling: self.sampling,
            nthreads,
        })
    }
}

/// Validated parameters of the int8 transformed-domain GEMM. Tensor sizes
/// are per `O4` slice; weights are per `I4` slice.
#[derive(Debug, Clone, PartialEq)]
pub struct WinoGemmParams {
    pub a: usize,
    pub v: usize,
    pub ic: usize,
    pub ir: usize,
    pub i2: usize,
    pub i3: usize,
    pub i4: usize,
    pub o2: usize,
    pub o3: usize,
    pub o4: usize,
    pub t: usize,
    pub tr: usize,
    pub t2: usize,
    pub sampling: SamplingKind,
    pub nthreads: usize,
}

impl WinoGemmParams {
    /// Rows of tile `t2`.
    #[inline]
    pub fn tz(&self, t2: usize) -> usize {
        if t2 + 1 == self.t2 {
            self.tr
        } else {
            self.t
        }
    }

    /// `[t2][A][A][I3][I2][T][V]`
    pub fn tinput_len(&self) -> usize {
        self.t2 * self.a * self.a * self.i3 * self.i2 * self.t * self.v
    }

    /// `[O3][I3][A][A][O2][I2][V][V]`, one `I4` slice.
    pub fn tweights_len(&self) -> usize {
        self.o3 * self.i3 * self.a * self.a * self.o2 * self.i2 * self.v * self.v
    }

    /// `[t2][A][A][O3][O2][T][V]`
    pub fn toutput_len(&self) -> usize {
        self.t2 * self.a * self.a * self.o3 * self.o2 * self.t * self.v
    }

    /// `[O3][A][A][O2][V]`
    pub fn scale_len(&self) -> usize {
        self.o3 * self.a * self.a * self.o2 * self.v
    }

    pub fn src_scale_len(&self) -> usize {
        match self.sampling {
            SamplingKind::Coarse => 2,
            SamplingKind::Fine => self.t2 * self.a * self.a * self.i3 * 2 * self.t,
            SamplingKind::Calibrated => 0,
        }
    }
}
