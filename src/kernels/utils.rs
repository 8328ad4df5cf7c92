/// Grows `v` to at least `len` elements; never shrinks.
pub fn ensure_capacity<T: Copy + Default>(v: &mut Vec<T>, len: usize) {
    if v.len() < len {
        v.resize(len, T::default());
    }
}

/// Row-major unflatten of `offset` over `shape` into `out`.
#[inline]
pub fn offset_to_indices(mut offset: usize, shape: &[usize], out: &mut [usize]) {
    for i in (0..shape.len()).rev() {
        out[i] = offset % shape[i];
        offset /= shape[i];
    }
}
