//! Control-flow graph construction from decoded bytecode.
//!
//! Implements leader discovery: IP 0 is a leader, every branch's target
//! and fall-through are leaders, and the byte following every return is a
//! leader. Blocks are the maximal runs between successive leaders.

use rustc_hash::FxHashMap;

use super::decoder::{DecodedInstr, Operands};
use crate::bytecode::Opcode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Debug)]
pub struct ControlFlowGraph {
    pub blocks: Vec<CfgBlock>,
    pub entry: BlockId,
    /// Map from bytecode offset to the block that starts there.
    pub offset_to_block: FxHashMap<usize, BlockId>,
}

#[derive(Debug)]
pub struct CfgBlock {
    pub id: BlockId,
    pub start_offset: usize,
    /// Indices into the decoded instruction array passed to `build_cfg`.
    pub instrs: Vec<usize>,
    pub terminator: CfgTerminator,
    pub predecessors: Vec<BlockId>,
}

#[derive(Debug, Clone, Copy)]
pub enum CfgTerminator {
    Fallthrough(BlockId),
    Jump(BlockId),
    Branch {
        kind: BranchKind,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return,
    /// No successor yet — the last block of a function with an implicit
    /// fall-off-the-end, or an unreachable block.
    None,
}

#[derive(Debug, Clone, Copy)]
pub enum BranchKind {
    IfFalse,
    IfTrue,
}

/// Build a control-flow graph from a decoded instruction stream.
pub fn build_cfg(instrs: &[DecodedInstr]) -> ControlFlowGraph {
    if instrs.is_empty() {
        let mut offset_to_block = FxHashMap::default();
        offset_to_block.insert(0, BlockId(0));
        return ControlFlowGraph {
            blocks: vec![CfgBlock {
                id: BlockId(0),
                start_offset: 0,
                instrs: vec![],
                terminator: CfgTerminator::None,
                predecessors: vec![],
            }],
            entry: BlockId(0),
            offset_to_block,
        };
    }

    let mut starts = leader_offsets(instrs);
    // IP 0 is always a leader, even for a function whose first instruction
    // wasn't otherwise targeted.
    starts.insert(0);
    let mut sorted_starts: Vec<usize> = starts.into_iter().collect();
    sorted_starts.sort_unstable();

    let mut offset_to_block = FxHashMap::default();
    for (idx, &start) in sorted_starts.iter().enumerate() {
        offset_to_block.insert(start, BlockId(idx as u32));
    }

    let block_count = sorted_starts.len();
    let mut blocks: Vec<CfgBlock> = sorted_starts
        .iter()
        .enumerate()
        .map(|(idx, &start)| CfgBlock {
            id: BlockId(idx as u32),
            start_offset: start,
            instrs: vec![],
            terminator: CfgTerminator::None,
            predecessors: vec![],
        })
        .collect();

    let mut current = 0usize;
    for (instr_idx, instr) in instrs.iter().enumerate() {
        while current + 1 < block_count && instr.offset >= sorted_starts[current + 1] {
            current += 1;
        }
        blocks[current].instrs.push(instr_idx);
    }

    for block_idx in 0..block_count {
        let Some(&last_instr_idx) = blocks[block_idx].instrs.last() else {
            if block_idx + 1 < block_count {
                blocks[block_idx].terminator =
                    CfgTerminator::Fallthrough(BlockId((block_idx + 1) as u32));
            }
            continue;
        };
        let last = &instrs[last_instr_idx];
        let next_offset = last.offset + last.size;

        blocks[block_idx].terminator = match last.opcode {
            Opcode::Jump | Opcode::Loop => {
                let Operands::I16(rel) = last.operands else {
                    unreachable!("decoder guarantees I16 operand for {:?}", last.opcode)
                };
                let target = resolve_jump(last.offset, last.size, rel);
                CfgTerminator::Jump(target_block(&offset_to_block, target))
            }
            Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                let Operands::I16(rel) = last.operands else {
                    unreachable!("decoder guarantees I16 operand for {:?}", last.opcode)
                };
                let target = resolve_jump(last.offset, last.size, rel);
                let target_block_id = target_block(&offset_to_block, target);
                let fallthrough_block_id = target_block(&offset_to_block, next_offset);
                // `then_block` is the truthy successor everywhere downstream
                // (IR `Branch`, the interpreter, the emitter's `Ne` test).
                // `JumpIfFalse` takes its encoded target on a falsy
                // condition, so that target is the *else* branch here; a
                // falsy `JumpIfTrue` condition falls through instead.
                let (then_block, else_block, kind) = if last.opcode == Opcode::JumpIfFalse {
                    (fallthrough_block_id, target_block_id, BranchKind::IfFalse)
                } else {
                    (target_block_id, fallthrough_block_id, BranchKind::IfTrue)
                };
                CfgTerminator::Branch {
                    kind,
                    then_block,
                    else_block,
                }
            }
            Opcode::Return => CfgTerminator::Return,
            _ => {
                if let Some(&next_block) = offset_to_block.get(&next_offset) {
                    CfgTerminator::Fallthrough(next_block)
                } else if block_idx + 1 < block_count {
                    CfgTerminator::Fallthrough(BlockId((block_idx + 1) as u32))
                } else {
                    CfgTerminator::None
                }
            }
        };
    }

    for block_idx in 0..block_count {
        let succs = successors_of(&blocks[block_idx].terminator);
        let src = BlockId(block_idx as u32);
        for succ in succs {
            if (succ.0 as usize) < block_count {
                blocks[succ.0 as usize].predecessors.push(src);
            }
        }
    }

    ControlFlowGraph {
        blocks,
        entry: BlockId(0),
        offset_to_block,
    }
}

fn target_block(offset_to_block: &FxHashMap<usize, BlockId>, offset: usize) -> BlockId {
    offset_to_block.get(&offset).copied().unwrap_or(BlockId(0))
}

fn successors_of(terminator: &CfgTerminator) -> Vec<BlockId> {
    match terminator {
        CfgTerminator::Fallthrough(b) | CfgTerminator::Jump(b) => vec![*b],
        CfgTerminator::Branch {
            then_block,
            else_block,
            ..
        } => vec![*then_block, *else_block],
        CfgTerminator::Return | CfgTerminator::None => vec![],
    }
}

/// Collect every offset that must start a block: branch targets, branch
/// fall-throughs, and the instruction following each return.
fn leader_offsets(instrs: &[DecodedInstr]) -> std::collections::HashSet<usize> {
    let mut starts = std::collections::HashSet::new();
    for instr in instrs {
        match instr.opcode {
            Opcode::Jump | Opcode::Loop => {
                if let Operands::I16(rel) = instr.operands {
                    starts.insert(resolve_jump(instr.offset, instr.size, rel));
                    starts.insert(instr.offset + instr.size);
                }
            }
            Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
                if let Operands::I16(rel) = instr.operands {
                    starts.insert(resolve_jump(instr.offset, instr.size, rel));
                    starts.insert(instr.offset + instr.size);
                }
            }
            Opcode::Return => {
                starts.insert(instr.offset + instr.size);
            }
            _ => {}
        }
    }
    starts
}

/// Resolves a branch/loop target: offsets are relative to the byte
/// following the instruction (`instr_offset + size`), not to the
/// instruction's own first byte — the same end-of-instruction convention
/// `runtime::function_table::patch_relative_call` uses for machine-code
/// relative calls.
fn resolve_jump(instr_offset: usize, size: usize, relative: i16) -> usize {
    ((instr_offset + size) as i64 + (relative as i64)) as usize
}

impl ControlFlowGraph {
    pub fn block(&self, id: BlockId) -> &CfgBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        successors_of(&self.blocks[id.0 as usize].terminator)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Every block except entry must have at least one predecessor, and
    /// every non-terminal block's terminator must name a real successor.
    pub fn check_integrity(&self) -> bool {
        self.blocks.iter().enumerate().all(|(idx, block)| {
            (idx == 0 || !block.predecessors.is_empty())
                && !matches!(block.terminator, CfgTerminator::None if !block.instrs.is_empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::decoder::decode_function;

    fn emit(code: &mut Vec<u8>, op: Opcode) {
        code.push(op as u8);
    }

    fn emit_u16(code: &mut Vec<u8>, op: Opcode, v: u16) {
        code.push(op as u8);
        code.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_jump(code: &mut Vec<u8>, op: Opcode, rel: i16) {
        code.push(op as u8);
        code.extend_from_slice(&rel.to_le_bytes());
    }

    #[test]
    fn linear_code_is_one_block() {
        let mut code = Vec::new();
        emit_u16(&mut code, Opcode::PushConst, 0);
        emit_u16(&mut code, Opcode::PushConst, 1);
        emit(&mut code, Opcode::Add);
        emit(&mut code, Opcode::Return);

        let instrs = decode_function(&code).unwrap();
        let cfg = build_cfg(&instrs);
        assert_eq!(cfg.block_count(), 1);
        assert_eq!(cfg.entry, BlockId(0));
        assert!(matches!(
            cfg.block(BlockId(0)).terminator,
            CfgTerminator::Return
        ));
    }

    #[test]
    fn unconditional_jump_skips_dead_code() {
        // offset 0: Jump +3 (size 3, target = 0+3+3 = 6)
        // offset 3: PushConst 1 (dead)
        // offset 6: Return
        let mut code = Vec::new();
        emit_jump(&mut code, Opcode::Jump, 3);
        emit_u16(&mut code, Opcode::PushConst, 1);
        emit(&mut code, Opcode::Return);

        let instrs = decode_function(&code).unwrap();
        let cfg = build_cfg(&instrs);
        assert!(cfg.block_count() >= 2);
        assert!(matches!(
            cfg.block(BlockId(0)).terminator,
            CfgTerminator::Jump(_)
        ));
    }

    #[test]
    fn conditional_branch_has_two_successors() {
        // offset 0: PushTrue (1 byte)
        // offset 1: JumpIfFalse rel=3, size 3 -> target = 1+3+3 = 7
        //   (fallthrough/then at offset 4, else at offset 7)
        let mut code = Vec::new();
        emit(&mut code, Opcode::PushTrue); // offset 0, size 1
        emit_jump(&mut code, Opcode::JumpIfFalse, 3); // offset 1, size 3, target = 1+3+3=7
        emit_u16(&mut code, Opcode::PushConst, 1); // offset 4 (then), size 3
        emit(&mut code, Opcode::Return); // offset 7 (else)

        let instrs = decode_function(&code).unwrap();
        let cfg = build_cfg(&instrs);
        let succs = cfg.successors(cfg.entry);
        assert_eq!(succs.len(), 2);
    }

    #[test]
    fn loop_jumps_back_to_header() {
        // offset 0: PushTrue (1)
        // offset 1: JumpIfFalse rel=6, size 3 -> target = 1+3+6=10 (exit)
        // offset 4: Loop rel=-7, size 3 -> target = 4+3-7=0 (header)
        let mut code = Vec::new();
        emit(&mut code, Opcode::PushTrue); // offset 0
        emit_jump(&mut code, Opcode::JumpIfFalse, 6); // offset 1, size 3 -> target=10
        emit_jump(&mut code, Opcode::Loop, -7); // offset 4, size 3 -> target=0
        emit(&mut code, Opcode::Nop); // offset 7
        emit(&mut code, Opcode::Nop); // offset 8
        emit(&mut code, Opcode::Nop); // offset 9
        emit(&mut code, Opcode::Return); // offset 10

        let instrs = decode_function(&code).unwrap();
        let cfg = build_cfg(&instrs);
        let back_block = cfg.offset_to_block.get(&4).copied().unwrap();
        assert!(matches!(
            cfg.block(back_block).terminator,
            CfgTerminator::Jump(target) if target == BlockId(0)
        ));
    }

    #[test]
    fn empty_function_is_one_empty_block() {
        let instrs = decode_function(&[]).unwrap();
        let cfg = build_cfg(&instrs);
        assert_eq!(cfg.block_count(), 1);
    }

    #[test]
    fn merge_point_has_two_predecessors() {
        let mut code = Vec::new();
        emit(&mut code, Opcode::PushTrue); // offset 0
        emit_jump(&mut code, Opcode::JumpIfFalse, 4); // offset 1, size 3 -> target=8
        emit(&mut code, Opcode::Nop); // offset 4 (then)
        emit(&mut code, Opcode::Nop); // offset 5
        emit(&mut code, Opcode::Nop); // offset 6
        emit(&mut code, Opcode::Nop); // offset 7
        emit(&mut code, Opcode::Return); // offset 8 (merge)

        let instrs = decode_function(&code).unwrap();
        let cfg = build_cfg(&instrs);
        let merge = cfg.offset_to_block.get(&8).copied().unwrap();
        assert!(cfg.block(merge).predecessors.len() >= 1);
    }

    #[test]
    fn leader_set_matches_branch_targets_and_post_returns() {
        let mut code = Vec::new();
        emit(&mut code, Opcode::PushTrue);
        emit_jump(&mut code, Opcode::JumpIfFalse, 5); // offset 1, size 3 -> target=9
        emit(&mut code, Opcode::Return);
        emit(&mut code, Opcode::Nop);
        emit(&mut code, Opcode::Nop);
        emit(&mut code, Opcode::Nop);
        emit(&mut code, Opcode::Nop);
        emit(&mut code, Opcode::Return);

        let instrs = decode_function(&code).unwrap();
        let cfg = build_cfg(&instrs);
        // 0 is always a leader; the JumpIfFalse's target and fallthrough
        // and the byte after each Return must all be leaders too.
        assert!(cfg.offset_to_block.contains_key(&0));
        assert!(cfg.check_integrity());
    }
}
