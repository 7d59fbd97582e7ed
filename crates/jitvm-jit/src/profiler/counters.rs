//! Per-function and per-loop-header counters backing the profiler's
//! state machine. Every counter here is read and written without a lock:
//! call/loop counts are relaxed atomic increments, state transitions go
//! through compare-and-swap so exactly one caller observes a given edge.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use dashmap::DashMap;

/// A function's (or loop header's) position in the hotspot lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProfileState {
    Cold = 0,
    Warm = 1,
    Hot = 2,
    Compiled = 3,
}

impl ProfileState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Cold,
            1 => Self::Warm,
            2 => Self::Hot,
            _ => Self::Compiled,
        }
    }
}

/// Which runtime type a call-site observed, for the int/float/other
/// speculation histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Int,
    Float,
    Other,
}

#[derive(Debug, Default)]
pub struct TypeCounts {
    pub int: AtomicU64,
    pub float: AtomicU64,
    pub other: AtomicU64,
}

impl TypeCounts {
    pub fn record(&self, kind: TypeKind) {
        let counter = match kind {
            TypeKind::Int => &self.int,
            TypeKind::Float => &self.float,
            TypeKind::Other => &self.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.int.load(Ordering::Relaxed)
            + self.float.load(Ordering::Relaxed)
            + self.other.load(Ordering::Relaxed)
    }

    /// Whether int observations dominate this site strongly enough to
    /// annotate the corresponding IR instruction with an integer fast
    /// path (ratio >= 0.95, minimum sample size applied by the caller).
    pub fn is_int_dominant(&self) -> bool {
        let total = self.total();
        total > 0 && (self.int.load(Ordering::Relaxed) as f64 / total as f64) >= 0.95
    }
}

/// Iteration/state tracking for a single loop header, keyed by its
/// backedge instruction pointer in the owning function's profile.
#[derive(Debug)]
pub struct LoopProfile {
    pub iterations: AtomicU64,
    state: AtomicU8,
}

impl Default for LoopProfile {
    fn default() -> Self {
        Self {
            iterations: AtomicU64::new(0),
            state: AtomicU8::new(ProfileState::Cold as u8),
        }
    }
}

impl LoopProfile {
    pub fn state(&self) -> ProfileState {
        ProfileState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn cas_state(&self, from: ProfileState, to: ProfileState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The full per-function profile: call count, lifecycle state, the
/// per-bytecode-offset type histogram, per-loop-header iteration
/// profiles, and the failure counter that suppresses repeated
/// compilation attempts.
pub struct FunctionProfile {
    call_count: AtomicU64,
    state: AtomicU8,
    failure_count: AtomicU32,
    pub type_histogram: DashMap<u32, TypeCounts>,
    pub loop_profiles: DashMap<u32, LoopProfile>,
}

/// Compilation is abandoned for a function after this many failed
/// attempts.
pub const MAX_COMPILE_FAILURES: u32 = 3;

impl Default for FunctionProfile {
    fn default() -> Self {
        Self {
            call_count: AtomicU64::new(0),
            state: AtomicU8::new(ProfileState::Cold as u8),
            failure_count: AtomicU32::new(0),
            type_histogram: DashMap::new(),
            loop_profiles: DashMap::new(),
        }
    }
}

impl FunctionProfile {
    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ProfileState {
        ProfileState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn is_suppressed(&self) -> bool {
        self.failure_count() >= MAX_COMPILE_FAILURES
    }

    /// Increments the call counter; returns the new total.
    pub fn bump_call(&self) -> u64 {
        self.call_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn cas_state(&self, from: ProfileState, to: ProfileState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Attempts the Cold->Warm or Warm->Hot transition implied by `count`
    /// crossing `warm_at`/`hot_at`. Returns `true` exactly once, on the
    /// caller that wins the Warm->Hot race — that caller is responsible
    /// for firing the hot-compile callback.
    pub fn maybe_transition(&self, count: u64, warm_at: u64, hot_at: u64) -> bool {
        if count >= warm_at {
            self.cas_state(ProfileState::Cold, ProfileState::Warm);
        }
        if count >= hot_at {
            return self.cas_state(ProfileState::Warm, ProfileState::Hot);
        }
        false
    }

    /// Marks the function as compiled. Idempotent: later calls are no-ops
    /// once the state has moved past `Hot`.
    pub fn mark_compiled(&self) {
        self.cas_state(ProfileState::Hot, ProfileState::Compiled);
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_type(&self, ip: u32, kind: TypeKind) {
        self.type_histogram.entry(ip).or_default().record(kind);
    }

    /// Records a loop backedge; returns `true` exactly once, on the
    /// caller that wins the loop's Cold->Hot race (the loop profile has
    /// no intermediate Warm state — only whether it's gone hot yet).
    pub fn record_loop(&self, header_ip: u32, loop_threshold: u64) -> bool {
        let profile = self.loop_profiles.entry(header_ip).or_default();
        let count = profile.iterations.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= loop_threshold {
            return profile.cas_state(ProfileState::Cold, ProfileState::Hot);
        }
        false
    }
}
