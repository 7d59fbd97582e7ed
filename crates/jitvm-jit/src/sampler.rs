//! CPU/heap sampling profiler: collects collapsed-stack samples on a
//! timer for downstream flamegraph tooling. Only data collection lives
//! here — rendering collapsed stacks into an actual flamegraph or pprof
//! file is an embedder's concern.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 100;
pub const MAX_SAMPLE_RATE_HZ: u32 = 1000;

/// A pluggable callback returning the current call stack as a list of
/// frame names, innermost first. Supplied by the embedder — this crate
/// has no notion of what a "frame" is beyond a display string.
pub type StackSamplerFn = Box<dyn Fn() -> Vec<String> + Send + Sync>;

/// Samples a stack-sampler callback at a bounded rate and aggregates the
/// results into collapsed-stack lines (`frame1;frame2;...;frameN N`).
///
/// Rate limiting is driven by [`Self::maybe_sample`], called from
/// whatever hot loop the embedder already runs (interpreter dispatch,
/// typically) — this has no timer thread of its own. A compare-and-swap
/// on the next-due timestamp ensures that under concurrent callers,
/// exactly one wins each tick and takes the sample.
pub struct Sampler {
    callback: StackSamplerFn,
    start: Instant,
    interval_nanos: u64,
    next_due_nanos: AtomicU64,
    collapsed: Mutex<FxHashMap<String, u64>>,
}

impl Sampler {
    /// `rate_hz` is clamped into `[1, MAX_SAMPLE_RATE_HZ]`.
    pub fn new(rate_hz: u32, callback: impl Fn() -> Vec<String> + Send + Sync + 'static) -> Self {
        let hz = rate_hz.clamp(1, MAX_SAMPLE_RATE_HZ) as u64;
        Self {
            callback: Box::new(callback),
            start: Instant::now(),
            interval_nanos: 1_000_000_000 / hz,
            next_due_nanos: AtomicU64::new(0),
            collapsed: Mutex::new(FxHashMap::default()),
        }
    }

    /// Takes a sample if the sampling interval has elapsed since the
    /// last one; otherwise a cheap no-op. Returns whether a sample was
    /// actually taken.
    pub fn maybe_sample(&self) -> bool {
        let now_nanos = self.start.elapsed().as_nanos() as u64;
        let due = self.next_due_nanos.load(Ordering::Relaxed);
        if now_nanos < due {
            return false;
        }
        if self
            .next_due_nanos
            .compare_exchange(
                due,
                now_nanos + self.interval_nanos,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return false;
        }

        let frames = (self.callback)();
        let key = frames.join(";");
        *self.collapsed.lock().entry(key).or_insert(0) += 1;
        true
    }

    /// Collapsed-stack lines in `frame1;frame2;...;frameN count` format,
    /// ready for a flamegraph tool to consume.
    pub fn collapsed_stacks(&self) -> Vec<String> {
        self.collapsed
            .lock()
            .iter()
            .map(|(stack, count)| format!("{stack} {count}"))
            .collect()
    }

    pub fn sample_count(&self) -> u64 {
        self.collapsed.lock().values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    #[test]
    fn rate_limiting_skips_samples_within_the_interval() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        // 1 Hz: the second immediate call should be skipped.
        let sampler = Sampler::new(1, move || {
            calls_clone.fetch_add(1, Ordering::Relaxed);
            vec!["main".to_string()]
        });

        assert!(sampler.maybe_sample());
        assert!(!sampler.maybe_sample());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn collapsed_stacks_aggregate_repeated_samples() {
        let sampler = Sampler::new(MAX_SAMPLE_RATE_HZ, || {
            vec!["main".to_string(), "compute".to_string()]
        });
        std::thread::sleep(std::time::Duration::from_millis(5));
        sampler.maybe_sample();
        std::thread::sleep(std::time::Duration::from_millis(5));
        sampler.maybe_sample();

        let stacks = sampler.collapsed_stacks();
        assert_eq!(stacks.len(), 1);
        assert!(stacks[0].starts_with("main;compute "));
    }

    #[test]
    fn rate_above_the_ceiling_is_clamped() {
        let sampler = Sampler::new(50_000, || vec![]);
        assert_eq!(sampler.interval_nanos, 1_000_000_000 / MAX_SAMPLE_RATE_HZ as u64);
    }
}
