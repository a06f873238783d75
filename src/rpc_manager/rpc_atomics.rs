use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Run-wide RPC call statistics
/// Uses lock-free atomic operations since every worker records into it
#[derive(Debug, Default)]
pub struct AtomicCallStats {
    /// Total call attempts, including retries
    pub total_calls: AtomicU64,

    /// Attempts that returned a result
    pub total_successes: AtomicU64,

    /// Attempts that returned an error
    pub total_errors: AtomicU64,

    /// Attempts rejected by endpoint throttling
    pub rate_limit_hits: AtomicU64,
}

/// Point-in-time copy of [`AtomicCallStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallStatsSnapshot {
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_errors: u64,
    pub rate_limit_hits: u64,
}

impl AtomicCallStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self, success: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.total_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rate_limit_hit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_calls.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let successes = self.total_successes.load(Ordering::Relaxed);
        successes as f64 / total as f64
    }

    pub fn snapshot(&self) -> CallStatsSnapshot {
        CallStatsSnapshot {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_recording() {
        let stats = Arc::new(AtomicCallStats::new());
        let mut handles = vec![];

        for i in 0..8 {
            let stats = stats.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    stats.record_call(i % 2 == 0);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_calls, 800);
        assert_eq!(snapshot.total_successes, 400);
        assert_eq!(snapshot.total_errors, 400);
        assert_eq!(stats.success_rate(), 0.5);
    }

    #[test]
    fn test_empty_success_rate() {
        assert_eq!(AtomicCallStats::new().success_rate(), 1.0);
    }
}
