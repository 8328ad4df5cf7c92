//! Static work partitioning over a fixed-size thread pool.
//!
//! An [`IterSpace`] is a row-major Cartesian product of loop axes, one of
//! which may be marked serial. The parallel axes are flattened and every
//! pool thread takes one contiguous, balanced range of the flattened index;
//! for each parallel point the serial axis runs in order on that thread.

use crate::error::Result;
use crate::kernels::utils::offset_to_indices;
use std::ops::Range;

pub const MAX_AXES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterSpace {
    dims: Vec<usize>,
    serial: Option<usize>,
}

impl IterSpace {
    pub fn new(dims: &[usize]) -> Self {
        assert!(!dims.is_empty() && dims.len() <= MAX_AXES, "IterSpace: 1..={} axes", MAX_AXES);
        Self {
            dims: dims.to_vec(),
            serial: None,
        }
    }

    /// Marks `axis` to be iterated in order inside one work item.
    pub fn with_serial(mut self, axis: usize) -> Self {
        assert!(axis < self.dims.len());
        self.serial = Some(axis);
        self
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn serial_len(&self) -> usize {
        self.serial.map_or(1, |a| self.dims[a])
    }

    pub fn parallel_len(&self) -> usize {
        self.len() / self.serial_len().max(1)
    }

    /// Parallel axis extents, the serial axis collapsed to 1.
    fn parallel_dims(&self) -> [usize; MAX_AXES] {
        let mut dims = [1; MAX_AXES];
        dims[..self.rank()].copy_from_slice(&self.dims);
        if let Some(a) = self.serial {
            dims[a] = 1;
        }
        dims
    }

    /// Visits the points of parallel range `range` in lexicographic order.
    pub fn visit<F: FnMut(&[usize])>(&self, range: Range<usize>, mut f: F) {
        let rank = self.rank();
        let pdims = self.parallel_dims();
        let mut idx = [0usize; MAX_AXES];
        for flat in range {
            offset_to_indices(flat, &pdims[..rank], &mut idx[..rank]);
            match self.serial {
                Some(a) => {
                    for s in 0..self.dims[a] {
                        idx[a] = s;
                        f(&idx[..rank]);
                    }
                }
                None => f(&idx[..rank]),
            }
        }
    }
}

/// Balanced contiguous share of `len` items for thread `tid` of `nthreads`:
/// the first `len % nthreads` threads take one extra item.
pub fn static_range(len: usize, nthreads: usize, tid: usize) -> Range<usize> {
    let base = len / nthreads;
    let extra = len % nthreads;
    let start = tid * base + tid.min(extra);
    let size = base + usize::from(tid < extra);
    start..start + size
}

/// Fixed-size pool plus the static scheduling rules above.
#[derive(Debug)]
pub struct Partitioner {
    pool: rayon::ThreadPool,
    nthreads: usize,
}

impl Partitioner {
    pub fn new(nthreads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(nthreads).build()?;
        Ok(Self {
            nthreads: pool.current_num_threads(),
            pool,
        })
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    /// Runs `op` inside the pool so rayon parallel iterators use it.
    pub fn install<R: Send, OP: FnOnce() -> R + Send>(&self, op: OP) -> R {
        self.pool.install(op)
    }

    /// Flat partition: one parallel pass, every point visited exactly once.
    pub fn for_each<F>(&self, space: &IterSpace, f: F)
    where
        F: Fn(&[usize]) + Sync,
    {
        self.for_each_with_thread(space, |_, idx| f(idx));
    }

    /// Like [`Partitioner::for_each`], also passing the thread index.
    pub fn for_each_with_thread<F>(&self, space: &IterSpace, f: F)
    where
        F: Fn(usize, &[usize]) + Sync,
    {
        let len = space.parallel_len();
        if len == 0 {
            return;
        }
        let nthreads = self.nthreads;
        self.pool.broadcast(|ctx| {
            let tid = ctx.index();
            space.visit(static_range(len, nthreads, tid), |idx| f(tid, idx));
        });
    }

    /// Split-reduction partition: every producer point completes before any
    /// combiner point starts.
    pub fn split_reduction<P, C>(&self, producers: &IterSpace, produce: P, combiner: &IterSpace, combine: C)
    where
        P: Fn(&[usize]) + Sync,
        C: Fn(&[usize]) + Sync,
    {
        self.for_each(producers, produce);
        // `broadcast` returns only after every thread finished its share,
        // which is the barrier between the two phases.
        self.for_each(combiner, combine);
    }
}
