//! Hotspot profiler: decides when a function or loop has run often
//! enough to deserve JIT compilation.
//!
//! Three operations make up the contract: [`Profiler::record_call`],
//! [`Profiler::record_loop`], [`Profiler::record_type`]. All are
//! lock-free on the common path — per-function state lives in a
//! [`DashMap`], counters are atomics, and state transitions are
//! compare-and-swap so exactly one caller ever observes a given edge and
//! fires the corresponding callback.

pub mod counters;
pub mod policy;

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::JitConfig;
pub use counters::{FunctionProfile, LoopProfile, ProfileState, TypeCounts, TypeKind};
pub use policy::Policy;

type HotCallback = Box<dyn Fn(u32) + Send + Sync>;
type LoopHotCallback = Box<dyn Fn(u32, u32) + Send + Sync>;

/// Owns every function's profile and fires the Warm->Hot / loop-hot
/// callbacks that let a driver enqueue compilation.
pub struct Profiler {
    policy: Policy,
    profiles: DashMap<u32, Arc<FunctionProfile>>,
    on_hot: Option<HotCallback>,
    on_loop_hot: Option<LoopHotCallback>,
}

impl Profiler {
    pub fn new(config: &JitConfig) -> Self {
        Self {
            policy: Policy::from_config(config),
            profiles: DashMap::new(),
            on_hot: None,
            on_loop_hot: None,
        }
    }

    /// Registers the callback fired exactly once when a function crosses
    /// Warm->Hot.
    pub fn set_hot_callback(&mut self, f: impl Fn(u32) + Send + Sync + 'static) {
        self.on_hot = Some(Box::new(f));
    }

    /// Registers the callback fired exactly once when a loop header
    /// crosses its iteration threshold.
    pub fn set_loop_hot_callback(&mut self, f: impl Fn(u32, u32) + Send + Sync + 'static) {
        self.on_loop_hot = Some(Box::new(f));
    }

    pub fn profile_of(&self, func_index: u32) -> Arc<FunctionProfile> {
        self.profiles
            .entry(func_index)
            .or_insert_with(|| Arc::new(FunctionProfile::default()))
            .clone()
    }

    /// Records one call to `func_index`, advancing its lifecycle state.
    /// Fires the hot callback on the caller that wins the Warm->Hot race.
    pub fn record_call(&self, func_index: u32) -> ProfileState {
        let profile = self.profile_of(func_index);
        let count = profile.bump_call();
        let went_hot = profile.maybe_transition(count, self.policy.warm_at, self.policy.hot_at);
        if went_hot {
            if let Some(cb) = &self.on_hot {
                cb(func_index);
            }
        }
        profile.state()
    }

    /// Records a loop backedge at `header_ip` within `func_index`. Fires
    /// the loop-hot callback on the caller that wins that loop's race.
    pub fn record_loop(&self, func_index: u32, header_ip: u32) {
        let profile = self.profile_of(func_index);
        let went_hot = profile.record_loop(header_ip, self.policy.loop_hot_at);
        if went_hot {
            if let Some(cb) = &self.on_loop_hot {
                cb(func_index, header_ip);
            }
        }
    }

    pub fn record_type(&self, func_index: u32, ip: u32, kind: TypeKind) {
        self.profile_of(func_index).record_type(ip, kind);
    }

    pub fn record_failure(&self, func_index: u32) {
        self.profile_of(func_index).record_failure();
    }

    pub fn is_suppressed(&self, func_index: u32) -> bool {
        self.profile_of(func_index).is_suppressed()
    }

    pub fn mark_compiled(&self, func_index: u32) {
        self.profile_of(func_index).mark_compiled();
    }

    pub fn state_of(&self, func_index: u32) -> ProfileState {
        self.profile_of(func_index).state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn calling_a_function_1000_times_transitions_cold_to_hot_once() {
        let config = JitConfig::default();
        let mut profiler = Profiler::new(&config);
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        profiler.set_hot_callback(move |_| {
            fired_clone.fetch_add(1, Ordering::Relaxed);
        });

        for _ in 0..1000 {
            profiler.record_call(7);
        }
        assert_eq!(profiler.state_of(7), ProfileState::Hot);
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn loop_hot_callback_receives_header_ip() {
        let config = JitConfig::default();
        let mut profiler = Profiler::new(&config);
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();
        profiler.set_loop_hot_callback(move |func_index, header_ip| {
            *seen_clone.lock().unwrap() = Some((func_index, header_ip));
        });

        for _ in 0..config.loop_threshold {
            profiler.record_loop(3, 55);
        }
        assert_eq!(*seen.lock().unwrap(), Some((3, 55)));
    }
}
