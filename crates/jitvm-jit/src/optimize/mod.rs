//! Pass manager: named passes, per-pass change counters, and a
//! fixed-point driver bounded by an iteration cap. `JitOptimizer::for_level`
//! builds the O0–O3 pass lists described in the component design.

pub mod algebraic;
pub mod bounds_check;
pub mod branch_fold;
pub mod const_fold;
pub mod cse;
pub mod dce;
pub mod gvn;
pub mod inline;
pub mod licm;
pub mod peephole;

use crate::config::OptLevel;
use crate::ir::JitFunction;

/// One optimization pass over a single function. Passes report whether
/// they changed anything so the fixed-point driver knows when to stop.
pub trait OptPass {
    fn name(&self) -> &'static str;
    /// Returns `true` if the function was modified.
    fn run(&self, func: &mut JitFunction) -> bool;
}

#[derive(Debug, Default, Clone)]
pub struct PassStats {
    pub runs: u32,
    pub changes: u32,
}

pub struct JitOptimizer {
    passes: Vec<Box<dyn OptPass>>,
    /// Fixed-point iteration cap; termination is otherwise guaranteed by
    /// monotone cost (each pass strictly shrinks instruction count or key
    /// multiplicity), but a cap keeps pathological inputs bounded.
    max_iterations: u32,
    pub stats: rustc_hash::FxHashMap<&'static str, PassStats>,
}

impl JitOptimizer {
    pub fn empty() -> Self {
        Self {
            passes: Vec::new(),
            max_iterations: 10,
            stats: rustc_hash::FxHashMap::default(),
        }
    }

    pub fn add_pass(&mut self, pass: Box<dyn OptPass>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    /// Builds the fixed pipeline for a given optimization level.
    pub fn for_level(level: OptLevel) -> Self {
        let mut opt = Self::empty();
        if level == OptLevel::O0 {
            return opt;
        }
        opt.add_pass(Box::new(const_fold::ConstantFolding))
            .add_pass(Box::new(dce::DeadCodeElimination));
        if level >= OptLevel::O2 {
            opt.add_pass(Box::new(algebraic::AlgebraicSimplification))
                .add_pass(Box::new(cse::CommonSubexpressionElimination))
                .add_pass(Box::new(branch_fold::BranchFolding))
                .add_pass(Box::new(peephole::Peephole));
        }
        if level >= OptLevel::O3 {
            opt.add_pass(Box::new(bounds_check::BoundsCheckElimination))
                .add_pass(Box::new(licm::LoopInvariantCodeMotion))
                .add_pass(Box::new(gvn::GlobalValueNumbering));
        }
        opt
    }

    /// Runs every pass to a fixed point: repeat the full pass list until
    /// one iteration makes no change, or `max_iterations` is hit.
    pub fn optimize(&mut self, func: &mut JitFunction) {
        for _ in 0..self.max_iterations {
            let mut changed_this_round = false;
            for pass in &self.passes {
                let changed = pass.run(func);
                let entry = self.stats.entry(pass.name()).or_default();
                entry.runs += 1;
                if changed {
                    entry.changes += 1;
                    changed_this_round = true;
                }
            }
            if !changed_this_round {
                break;
            }
        }
        compact_nops(func);
    }
}

/// Removes `Nop` placeholders left behind by passes that delete
/// instructions without renumbering the block.
fn compact_nops(func: &mut JitFunction) {
    for block in &mut func.blocks {
        block
            .instrs
            .retain(|i| !matches!(i, crate::ir::JitInstr::Nop));
    }
}
