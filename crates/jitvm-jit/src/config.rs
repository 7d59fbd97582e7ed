//! The configuration record read once at driver construction. Parsing it
//! from flags, files, or environment variables is an embedder concern and
//! is out of scope here.

/// Options governing the compiler driver's behavior. All fields are read
/// once when a [`crate::driver::Driver`] is constructed; changing them
/// requires building a new driver.
#[derive(Debug, Clone)]
pub struct JitConfig {
    pub enabled: bool,
    pub hotspot_threshold: u32,
    pub loop_threshold: u32,
    pub optimization_level: OptLevel,
    pub max_inline_size: usize,
    pub max_inline_depth: u32,
    pub always_inline_size: usize,
    pub code_cache_arena_size: usize,
    pub worker_threads: usize,
    /// Gates the debug-level diagnostics described in §7's user-visible
    /// failure behavior; off by default.
    pub verbose: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hotspot_threshold: 1000,
            loop_threshold: 10_000,
            optimization_level: OptLevel::O2,
            max_inline_size: 50,
            max_inline_depth: 3,
            always_inline_size: 20,
            code_cache_arena_size: 64 * 1024,
            worker_threads: num_cpus::get().max(1),
            verbose: false,
        }
    }
}

/// Optimization level, selecting a fixed pass pipeline (see `optimize::JitOptimizer::for_level`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    O0 = 0,
    O1 = 1,
    O2 = 2,
    O3 = 3,
}

impl OptLevel {
    pub fn from_u8(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::O0),
            1 => Some(Self::O1),
            2 => Some(Self::O2),
            3 => Some(Self::O3),
            _ => None,
        }
    }
}
