//! The compiler driver: orchestrates lower → optimize → allocate → emit
//! → install for a single function, caches the result, and dispatches
//! hot-compile requests to a background worker pool so the interpreter
//! thread calling [`Driver::record_call`] is never blocked by a compile.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use dashmap::DashMap;

use rustc_hash::FxHashMap;

use crate::bytecode::Module;
use crate::config::{JitConfig, OptLevel};
use crate::emitter::{self, CompiledCode, RelocationTarget};
use crate::error::{JitError, JitResult};
use crate::ir::{CallTarget, JitFunction, JitInstr};
use crate::lower;
use crate::optimize::{inline, JitOptimizer};
use crate::profiler::{Profiler, TypeKind};
use crate::regalloc;
use crate::runtime::function_table::{self, FunctionTable};
use crate::runtime::helpers::HelperRegistry;
use crate::runtime::page::{self, PageAllocator};
use crate::runtime::CodeCache;

const HOT_COMPILE_QUEUE_CAPACITY: usize = 4096;

#[cfg(unix)]
fn default_allocator() -> Box<dyn PageAllocator> {
    Box::new(page::unix::MmapAllocator)
}

#[cfg(not(unix))]
fn default_allocator() -> Box<dyn PageAllocator> {
    Box::new(page::FakeAllocator)
}

#[derive(Debug, Default)]
struct DriverStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    compiles: AtomicU64,
    hotspot_compiles: AtomicU64,
    ir_instr_total: AtomicU64,
    code_byte_total: AtomicU64,
}

/// A point-in-time snapshot of the driver's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub compiles: u64,
    pub hotspot_compiles: u64,
    pub ir_instr_total: u64,
    pub code_byte_total: u64,
}

/// The orchestration state shared between the driver handle and every
/// worker thread. Split out from [`Driver`] so worker threads can hold
/// an `Arc` to it without needing a reference back to the driver itself.
struct CompilerCore {
    config: JitConfig,
    module: Module,
    code_cache: CodeCache,
    function_table: FunctionTable,
    helpers: HelperRegistry,
    profiler: Profiler,
    stats: DriverStats,
    compiled: DashMap<u32, Arc<CompiledCode>>,
}

impl CompilerCore {
    /// The full seven-step pipeline for a single function: cache check,
    /// lower, optimize, allocate, emit, install + link, cache.
    fn compile(&self, func_index: u32) -> JitResult<Arc<CompiledCode>> {
        if let Some(existing) = self.compiled.get(&func_index) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(existing.clone());
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        match self.compile_uncached(func_index) {
            Ok(code) => Ok(code),
            Err(err) => {
                self.profiler.record_failure(func_index);
                Err(err)
            }
        }
    }

    fn compile_uncached(&self, func_index: u32) -> JitResult<Arc<CompiledCode>> {
        let bc = self
            .module
            .get(func_index)
            .ok_or_else(|| JitError::Unsupported(format!("no function at index {func_index}")))?;

        let mut ir = lower::lower(bc)?;
        if self.config.optimization_level == OptLevel::O3 {
            let direct_callees = direct_call_targets(&ir);
            let candidates =
                lower_inline_candidates(&self.module, direct_callees, self.config.max_inline_depth);
            inline::inline_calls(&mut ir, &candidates);
        }
        let mut optimizer = JitOptimizer::for_level(self.config.optimization_level);
        optimizer.optimize(&mut ir);
        let alloc = regalloc::allocate(&ir);
        let code = emitter::emit(&ir, &alloc);

        let installed = self.code_cache.install(func_index, &code)?;
        for reloc in &code.relocations {
            let call_site = installed.code_ptr + reloc.code_offset;
            match &reloc.target {
                RelocationTarget::Helper(name) => {
                    let addr = self
                        .helpers
                        .resolve(name)
                        .ok_or_else(|| JitError::HelperMissing((*name).to_string()))?;
                    // SAFETY: `call_site` is within the code just installed
                    // into an executable arena, at an `E8` call the emitter
                    // recorded for this exact relocation.
                    unsafe { function_table::patch_relative_call(call_site, addr) };
                }
                RelocationTarget::Function(target_index) => {
                    self.function_table.register_patch_site(*target_index, call_site);
                }
            }
        }
        self.function_table.publish(func_index, installed.entry_ptr);

        self.stats.compiles.fetch_add(1, Ordering::Relaxed);
        self.stats
            .ir_instr_total
            .fetch_add(ir.instr_count() as u64, Ordering::Relaxed);
        self.stats
            .code_byte_total
            .fetch_add(code.code.len() as u64, Ordering::Relaxed);

        let code = Arc::new(code);
        self.compiled.insert(func_index, code.clone());
        self.profiler.mark_compiled(func_index);
        Ok(code)
    }
}

/// Direct-call targets reachable from `func`'s own instructions (helper
/// calls are never inline candidates).
fn direct_call_targets(func: &JitFunction) -> Vec<u32> {
    func.blocks
        .iter()
        .flat_map(|b| &b.instrs)
        .filter_map(|instr| match instr {
            JitInstr::Call {
                target: CallTarget::Direct(idx),
                ..
            } => Some(*idx),
            _ => None,
        })
        .collect()
}

/// Lowers every function reachable from `roots` by direct calls, up to
/// `max_depth` levels deep, so [`inline::inline_calls`] has a body to
/// splice for each candidate call site (including callees of callees,
/// matching the inliner's own depth bound).
fn lower_inline_candidates(
    module: &Module,
    roots: Vec<u32>,
    max_depth: u32,
) -> FxHashMap<u32, JitFunction> {
    let mut lowered = FxHashMap::default();
    let mut frontier = roots;
    for _ in 0..max_depth {
        if frontier.is_empty() {
            break;
        }
        let mut next = Vec::new();
        for idx in frontier.drain(..) {
            if lowered.contains_key(&idx) {
                continue;
            }
            let Some(bc) = module.get(idx) else {
                continue;
            };
            let Ok(callee_ir) = lower::lower(bc) else {
                continue;
            };
            next.extend(direct_call_targets(&callee_ir));
            lowered.insert(idx, callee_ir);
        }
        frontier = next;
    }
    lowered
}

/// Compiles bytecode functions on demand or in response to the
/// profiler's hotspot callbacks, owning the code cache, function table,
/// helper registry, and a fixed background worker pool.
pub struct Driver {
    core: Arc<CompilerCore>,
    job_tx: Option<Sender<u32>>,
    workers: Vec<JoinHandle<()>>,
}

impl Driver {
    pub fn new(config: JitConfig, module: Module, helpers: HelperRegistry) -> Self {
        let mut profiler = Profiler::new(&config);
        let (job_tx, job_rx) = bounded::<u32>(HOT_COMPILE_QUEUE_CAPACITY);
        let hot_tx = job_tx.clone();
        profiler.set_hot_callback(move |func_index| {
            // A full queue means the worker pool is already saturated;
            // dropping a duplicate hot-compile request for a function
            // that's already enqueued or mid-compile is harmless.
            let _ = hot_tx.try_send(func_index);
        });

        let worker_count = config.worker_threads.max(1);
        let core = Arc::new(CompilerCore {
            config,
            module,
            code_cache: CodeCache::new(default_allocator()),
            function_table: FunctionTable::new(),
            helpers,
            profiler,
            stats: DriverStats::default(),
            compiled: DashMap::new(),
        });

        let workers = (0..worker_count)
            .map(|_| {
                let core = core.clone();
                let job_rx = job_rx.clone();
                thread::spawn(move || {
                    while let Ok(func_index) = job_rx.recv() {
                        if core.profiler.is_suppressed(func_index) {
                            continue;
                        }
                        let _ = core.compile(func_index);
                        core.stats.hotspot_compiles.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        Self {
            core,
            job_tx: Some(job_tx),
            workers,
        }
    }

    /// Compiles `func_index` synchronously, returning the cached result
    /// on a repeat call.
    pub fn compile(&self, func_index: u32) -> JitResult<Arc<CompiledCode>> {
        self.core.compile(func_index)
    }

    /// Records one interpreter call to `func_index`; may enqueue an
    /// asynchronous hot-compile.
    pub fn record_call(&self, func_index: u32) {
        self.core.profiler.record_call(func_index);
    }

    pub fn record_loop(&self, func_index: u32, header_ip: u32) {
        self.core.profiler.record_loop(func_index, header_ip);
    }

    pub fn record_type(&self, func_index: u32, ip: u32, kind: TypeKind) {
        self.core.profiler.record_type(func_index, ip, kind);
    }

    pub fn function_table(&self) -> &FunctionTable {
        &self.core.function_table
    }

    pub fn code_cache(&self) -> &CodeCache {
        &self.core.code_cache
    }

    pub fn stats(&self) -> DriverStatsSnapshot {
        let s = &self.core.stats;
        DriverStatsSnapshot {
            cache_hits: s.cache_hits.load(Ordering::Relaxed),
            cache_misses: s.cache_misses.load(Ordering::Relaxed),
            compiles: s.compiles.load(Ordering::Relaxed),
            hotspot_compiles: s.hotspot_compiles.load(Ordering::Relaxed),
            ir_instr_total: s.ir_instr_total.load(Ordering::Relaxed),
            code_byte_total: s.code_byte_total.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.job_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::module::BytecodeFunction;
    use crate::bytecode::opcode::Opcode;
    use jitvm_abi::{Value, REQUIRED_HELPERS};

    fn const_return_module() -> Module {
        let mut code = Vec::new();
        code.push(Opcode::PushConst as u8);
        code.extend_from_slice(&0u16.to_le_bytes());
        code.push(Opcode::Return as u8);
        let mut module = Module::new();
        module.push(
            BytecodeFunction::new("answer", 0, 0, code).with_constants(vec![Value::int(42)]),
        );
        module
    }

    fn full_helpers() -> HelperRegistry {
        let mut helpers = HelperRegistry::new();
        for (i, name) in REQUIRED_HELPERS.iter().enumerate() {
            helpers.register(name, 0x4000 + i);
        }
        helpers
    }

    #[test]
    fn compiling_the_same_function_twice_hits_the_cache() {
        let mut config = JitConfig::default();
        config.worker_threads = 1;
        let driver = Driver::new(config, const_return_module(), full_helpers());

        driver.compile(0).unwrap();
        driver.compile(0).unwrap();

        let stats = driver.stats();
        assert_eq!(stats.compiles, 1);
        assert_eq!(stats.cache_hits, 1);
        assert!(driver.function_table().is_resolved(0));
    }

    #[test]
    fn compiling_an_out_of_range_index_fails() {
        let mut config = JitConfig::default();
        config.worker_threads = 1;
        let driver = Driver::new(config, const_return_module(), full_helpers());
        assert!(driver.compile(99).is_err());
    }

    #[test]
    fn o3_inlines_a_direct_call_and_preserves_behavior() {
        // callee(x) = x * 2, at index 1.
        let mut callee_code = Vec::new();
        callee_code.push(Opcode::LoadLocal as u8);
        callee_code.extend_from_slice(&0u16.to_le_bytes());
        callee_code.push(Opcode::PushConst as u8);
        callee_code.extend_from_slice(&0u16.to_le_bytes());
        callee_code.push(Opcode::Mul as u8);
        callee_code.push(Opcode::Return as u8);
        let callee = BytecodeFunction::new("double", 1, 1, callee_code)
            .with_constants(vec![Value::int(2)]);

        // caller(x) = double(x) + 1, at index 0.
        let mut caller_code = Vec::new();
        caller_code.push(Opcode::LoadLocal as u8);
        caller_code.extend_from_slice(&0u16.to_le_bytes());
        caller_code.push(Opcode::Call as u8);
        caller_code.extend_from_slice(&1u32.to_le_bytes());
        caller_code.push(1u8);
        caller_code.push(Opcode::PushConst as u8);
        caller_code.extend_from_slice(&0u16.to_le_bytes());
        caller_code.push(Opcode::Add as u8);
        caller_code.push(Opcode::Return as u8);
        let caller = BytecodeFunction::new("caller", 1, 1, caller_code)
            .with_constants(vec![Value::int(1)]);

        let mut module = Module::new();
        module.push(caller);
        module.push(callee);

        let mut config = JitConfig::default();
        config.worker_threads = 1;
        config.optimization_level = OptLevel::O3;
        let driver = Driver::new(config, module, full_helpers());

        driver.compile(0).unwrap();
        let entry = driver.function_table().address_of(0).unwrap();
        let result = unsafe { crate::runtime::call_bridge::call_bridge(entry, &[20]) }.unwrap();
        assert_eq!(result, 41);
    }

    #[test]
    fn repeated_calls_eventually_trigger_a_background_compile() {
        let mut config = JitConfig::default();
        config.worker_threads = 1;
        config.hotspot_threshold = 10;
        let driver = Driver::new(config, const_return_module(), full_helpers());

        for _ in 0..10 {
            driver.record_call(0);
        }

        // Give the worker thread a moment to drain the queue.
        for _ in 0..200 {
            if driver.function_table().is_resolved(0) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(driver.function_table().is_resolved(0));
    }
}
