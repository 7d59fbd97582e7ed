//! The three-operand IR: values, instructions, basic blocks, and the
//! function that owns them in an arena.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::types::JitType;

/// A virtual register: a stable id for an SSA-ish value. Exactly one
/// instruction defines each register (`Phi`/`Move` included); `Nop` never
/// defines one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JitBlockId(pub u32);

/// A local-variable slot index, as carried by bytecode `LoadLocal`/`StoreLocal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalSlot(pub u16);

/// Relational operators shared by comparison lowering and the emitter's
/// set-cc selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The operator obtained by swapping operand order (`a < b` becomes
    /// `b > a`), used by commutativity-aware passes like CSE.
    pub fn swapped(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }
}

/// The call target of a `Call` instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum CallTarget {
    /// A direct call to another bytecode function by index, resolved
    /// through the function table / PLT at emission time.
    Direct(u32),
    /// A call into the fixed helper registry by name (see `jitvm_abi::REQUIRED_HELPERS`).
    Helper(&'static str),
}

/// A single IR instruction. `dest` is `None` for instructions with no
/// result (stores, branches, void calls).
#[derive(Debug, Clone)]
pub enum JitInstr {
    /// Sentinel left behind by optimizer passes that remove an
    /// instruction without renumbering the block; compacted at the end
    /// of the pipeline.
    Nop,

    ConstInt { dest: Reg, value: i64 },
    ConstFloat { dest: Reg, value: f64 },
    ConstBool { dest: Reg, value: bool },

    // Arithmetic
    IAdd { dest: Reg, lhs: Reg, rhs: Reg },
    ISub { dest: Reg, lhs: Reg, rhs: Reg },
    IMul { dest: Reg, lhs: Reg, rhs: Reg },
    IDiv { dest: Reg, lhs: Reg, rhs: Reg },
    IMod { dest: Reg, lhs: Reg, rhs: Reg },
    INeg { dest: Reg, src: Reg },

    // Bitwise
    IAnd { dest: Reg, lhs: Reg, rhs: Reg },
    IOr { dest: Reg, lhs: Reg, rhs: Reg },
    IXor { dest: Reg, lhs: Reg, rhs: Reg },
    INot { dest: Reg, src: Reg },
    IShl { dest: Reg, lhs: Reg, rhs: Reg },
    IShr { dest: Reg, lhs: Reg, rhs: Reg },

    // Comparison
    ICmp { dest: Reg, op: CmpOp, lhs: Reg, rhs: Reg },

    // Locals
    LoadLocal { dest: Reg, slot: LocalSlot, ty: JitType },
    StoreLocal { slot: LocalSlot, src: Reg },

    /// SSA value copy. Produced by copy propagation's predecessor
    /// (`Phi` lowering for straight-line code) and consumed away by the
    /// `CopyPropagation` pass.
    Move { dest: Reg, src: Reg },

    /// Join point for values coming from multiple predecessors. The core
    /// lowering does not need to emit these for straight-line/structured
    /// code; the inliner's caller/callee merge can.
    Phi { dest: Reg, incoming: SmallVec<[(JitBlockId, Reg); 4]> },

    /// Direct or helper call. `args` in left-to-right order.
    Call { dest: Option<Reg>, target: CallTarget, args: SmallVec<[Reg; 4]> },

    /// Annotates that `value` was observed to be of `ty` at this program
    /// point with high confidence (type histogram ratio ≥ 0.95). Never
    /// removed by DCE even with no further uses — the emitter scans for
    /// it directly preceding an arithmetic/comparison instruction on the
    /// same destination to decide whether to keep the guard specialized.
    TypeHint { value: Reg, ty: JitType },

    Return { value: Option<Reg> },
    Jump { target: JitBlockId },
    /// Backward edge to a loop header; semantically identical to `Jump`
    /// but tagged so the emitter and LICM can tell loop back-edges apart
    /// from forward control flow.
    LoopJump { target: JitBlockId },
    Branch { cond: Reg, then_block: JitBlockId, else_block: JitBlockId },
}

impl JitInstr {
    pub fn dest(&self) -> Option<Reg> {
        use JitInstr::*;
        match self {
            Nop | StoreLocal { .. } | Return { .. } | Jump { .. } | LoopJump { .. }
            | Branch { .. } | TypeHint { .. } => None,
            ConstInt { dest, .. }
            | ConstFloat { dest, .. }
            | ConstBool { dest, .. }
            | IAdd { dest, .. }
            | ISub { dest, .. }
            | IMul { dest, .. }
            | IDiv { dest, .. }
            | IMod { dest, .. }
            | INeg { dest, .. }
            | IAnd { dest, .. }
            | IOr { dest, .. }
            | IXor { dest, .. }
            | INot { dest, .. }
            | IShl { dest, .. }
            | IShr { dest, .. }
            | ICmp { dest, .. }
            | LoadLocal { dest, .. }
            | Move { dest, .. }
            | Phi { dest, .. } => Some(*dest),
            Call { dest, .. } => *dest,
        }
    }

    /// Operands this instruction reads (not including `dest`).
    pub fn uses(&self) -> SmallVec<[Reg; 4]> {
        use JitInstr::*;
        match self {
            Nop | ConstInt { .. } | ConstFloat { .. } | ConstBool { .. } | LoadLocal { .. }
            | Jump { .. } | LoopJump { .. } => SmallVec::new(),
            IAdd { lhs, rhs, .. }
            | ISub { lhs, rhs, .. }
            | IMul { lhs, rhs, .. }
            | IDiv { lhs, rhs, .. }
            | IMod { lhs, rhs, .. }
            | IAnd { lhs, rhs, .. }
            | IOr { lhs, rhs, .. }
            | IXor { lhs, rhs, .. }
            | IShl { lhs, rhs, .. }
            | IShr { lhs, rhs, .. }
            | ICmp { lhs, rhs, .. } => SmallVec::from_slice(&[*lhs, *rhs]),
            INeg { src, .. } | INot { src, .. } | Move { src, .. } => SmallVec::from_slice(&[*src]),
            StoreLocal { src, .. } => SmallVec::from_slice(&[*src]),
            Phi { incoming, .. } => incoming.iter().map(|(_, r)| *r).collect(),
            Call { args, .. } => args.clone(),
            TypeHint { value, .. } => SmallVec::from_slice(&[*value]),
            Return { value } => value.iter().copied().collect(),
            Branch { cond, .. } => SmallVec::from_slice(&[*cond]),
        }
    }

    /// Whether removing this instruction (when its `dest` is unused)
    /// would be observably unsafe — calls, stores, returns, and control
    /// flow always survive DCE.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            JitInstr::StoreLocal { .. }
                | JitInstr::Call { .. }
                | JitInstr::Return { .. }
                | JitInstr::Jump { .. }
                | JitInstr::LoopJump { .. }
                | JitInstr::Branch { .. }
                | JitInstr::TypeHint { .. }
        )
    }
}

/// A basic block: straight-line instructions ending in a terminator, or
/// `None` if layout order makes the next block implicit (never true
/// after lowering — only intra-pass transiently).
#[derive(Debug, Clone, Default)]
pub struct JitBlock {
    pub id: JitBlockId,
    pub instrs: Vec<JitInstr>,
    pub predecessors: Vec<JitBlockId>,
}

/// An IR function: blocks in an arena indexed by `JitBlockId`, with a
/// monotonic register counter and the block holding its first instruction.
#[derive(Debug, Clone)]
pub struct JitFunction {
    pub func_index: u32,
    pub name: String,
    pub param_count: u8,
    pub local_count: u16,
    pub blocks: Vec<JitBlock>,
    pub entry: JitBlockId,
    next_reg: u32,
    pub reg_types: FxHashMap<Reg, JitType>,
}

impl JitFunction {
    pub fn new(func_index: u32, name: impl Into<String>, param_count: u8, local_count: u16) -> Self {
        Self {
            func_index,
            name: name.into(),
            param_count,
            local_count,
            blocks: vec![JitBlock {
                id: JitBlockId(0),
                instrs: Vec::new(),
                predecessors: Vec::new(),
            }],
            entry: JitBlockId(0),
            next_reg: 0,
            reg_types: FxHashMap::default(),
        }
    }

    pub fn alloc_reg(&mut self, ty: JitType) -> Reg {
        let reg = Reg(self.next_reg);
        self.next_reg += 1;
        self.reg_types.insert(reg, ty);
        reg
    }

    pub fn reg_type(&self, reg: Reg) -> JitType {
        self.reg_types.get(&reg).copied().unwrap_or(JitType::Value)
    }

    pub fn add_block(&mut self) -> JitBlockId {
        let id = JitBlockId(self.blocks.len() as u32);
        self.blocks.push(JitBlock {
            id,
            instrs: Vec::new(),
            predecessors: Vec::new(),
        });
        id
    }

    pub fn block(&self, id: JitBlockId) -> &JitBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: JitBlockId) -> &mut JitBlock {
        &mut self.blocks[id.0 as usize]
    }

    pub fn instr_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.instrs.iter().filter(|i| !matches!(i, JitInstr::Nop)).count())
            .sum()
    }

    /// Successor blocks of `id`, read off its terminator.
    pub fn successors(&self, id: JitBlockId) -> SmallVec<[JitBlockId; 2]> {
        match self.block(id).instrs.last() {
            Some(JitInstr::Jump { target } | JitInstr::LoopJump { target }) => {
                SmallVec::from_slice(&[*target])
            }
            Some(JitInstr::Branch {
                then_block,
                else_block,
                ..
            }) => SmallVec::from_slice(&[*then_block, *else_block]),
            _ => SmallVec::new(),
        }
    }

    /// Recomputes every block's `predecessors` list from its terminator.
    /// Passes that rewrite control flow (branch folding, inlining) call
    /// this once at the end rather than maintaining predecessors
    /// incrementally.
    pub fn recompute_predecessors(&mut self) {
        for block in &mut self.blocks {
            block.predecessors.clear();
        }
        for idx in 0..self.blocks.len() {
            let id = JitBlockId(idx as u32);
            for succ in self.successors(id) {
                self.blocks[succ.0 as usize].predecessors.push(id);
            }
        }
    }
}
