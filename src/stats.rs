use std::sync::atomic::{AtomicU64, Ordering};

/// Per-instance execution counters.
#[derive(Debug, Default)]
pub struct ExecStats {
    executions: AtomicU64,
    weight_packs: AtomicU64,
    kernel_calls: AtomicU64,
    combined_vectors: AtomicU64,
}

/// Point-in-time copy of [`ExecStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub executions: u64,
    pub weight_packs: u64,
    pub kernel_calls: u64,
    pub combined_vectors: u64,
}

impl ExecStats {
    pub fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pack(&self) {
        self.weight_packs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_kernel_calls(&self, n: u64) {
        self.kernel_calls.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_combined(&self, n: u64) {
        self.combined_vectors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            executions: self.executions.load(Ordering::Relaxed),
            weight_packs: self.weight_packs.load(Ordering::Relaxed),
            kernel_calls: self.kernel_calls.load(Ordering::Relaxed),
            combined_vectors: self.combined_vectors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.executions.store(0, Ordering::Relaxed);
        self.weight_packs.store(0, Ordering::Relaxed);
        self.kernel_calls.store(0, Ordering::Relaxed);
        self.combined_vectors.store(0, Ordering::Relaxed);
    }

    pub fn report(&self, name: &str) {
        let s = self.snapshot();
        eprintln!(
            "[{}] executions={} weight_packs={} kernel_calls={} combined_vectors={}",
            name, s.executions, s.weight_packs, s.kernel_calls, s.combined_vectors
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_reset() {
        let stats = ExecStats::default();
        stats.record_execution();
        stats.record_kernel_calls(12);
        assert_eq!(stats.snapshot().kernel_calls, 12);
        stats.reset();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
