/// Clamp applied by the output epilogues after bias.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Activation {
    pub lower: f32,
    pub upper: f32,
}

impl Activation {
    pub fn relu() -> Self {
        Self {
            lower: 0.0,
            upper: f32::INFINITY,
        }
    }

    pub fn relu6() -> Self {
        Self {
            lower: 0.0,
            upper: 6.0,
        }
    }

    /// Unchecked; `ConvDesc::setup` rejects inverted or NaN bounds.
    pub fn bounded(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }

    /// `lower <= upper`, neither NaN.
    pub fn is_valid(&self) -> bool {
        self.lower <= self.upper
    }

    #[inline(always)]
    pub fn apply(&self, x: f32) -> f32 {
        x.max(self.lower).min(self.upper)
    }

    pub fn apply_slice(&self, data: &mut [f32]) {
        for v in data.iter_mut() {
            *v = self.apply(*v);
        }
    }
}

/// `None` behaves as identity.
#[inline(always)]
pub fn clamp_opt(act: Option<&Activation>, x: f32) -> f32 {
    match act {
        Some(a) => a.apply(x),
        None => x,
    }
}
