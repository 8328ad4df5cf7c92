use std::ops::BitOr;

/// Per-call flags handed to a micro-kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct KernelAttr(u8);

impl KernelAttr {
    /// First reduction contribution: start from zero instead of accumulating.
    pub const CLEAR_OUTPUT: Self = Self(1);
    /// Last reduction contribution: apply the output epilogue.
    pub const RESTORE_OUTPUT: Self = Self(1 << 1);
    /// Only `Ir` lanes of the last input block are valid.
    pub const REMAINDER_INPUT: Self = Self(1 << 2);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline(always)]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Flags for one step of a reduction. The remainder flag only rides on
    /// the last step, and only when the channel count is not a multiple of `v`.
    pub fn step(first: bool, last: bool, ir: usize, v: usize) -> Self {
        let mut attr = Self::empty();
        if first {
            attr = attr | Self::CLEAR_OUTPUT;
        }
        if last {
            attr = attr | Self::RESTORE_OUTPUT;
            if ir != v {
                attr = attr | Self::REMAINDER_INPUT;
            }
        }
        attr
    }

    /// Two-level `(I3, I4)` reduction index.
    pub fn reduction_step(i3: usize, n_i3: usize, i4: usize, n_i4: usize, ir: usize, v: usize) -> Self {
        Self::step(i3 == 0 && i4 == 0, i3 + 1 == n_i3 && i4 + 1 == n_i4, ir, v)
    }
}

impl BitOr for KernelAttr {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
