//! Assembly-level optimization passes.
//!
//! Each pass implements the `AsmPass` trait and operates on a `Vec<AsmItem>`.
//! Passes are composed via the `PassManager` and run after code generation
//! but before the final text emission.

use super::abi::PhysReg;
use super::codegen::{BLOCK_LABEL_PREFIX, EPILOGUE_LABEL};
use super::instruction::{AsmItem, Operand, X86Instr};
use std::collections::HashSet;

// ============================================================================
// Pass infrastructure
// ============================================================================

/// A single optimization pass over assembly output.
pub trait AsmPass {
    fn run(&self, items: &mut Vec<AsmItem>);
}

/// Runs a sequence of `AsmPass`es in order.
struct PassManager {
    passes: Vec<Box<dyn AsmPass>>,
}

impl PassManager {
    fn new() -> Self {
        Self { passes: Vec::new() }
    }

    fn add(&mut self, pass: Box<dyn AsmPass>) {
        self.passes.push(pass);
    }

    fn run_all(&self, items: &mut Vec<AsmItem>) {
        for pass in &self.passes {
            pass.run(items);
        }
    }
}

/// Apply `f` to the body of every function.
fn for_each_body(items: &mut [AsmItem], mut f: impl FnMut(&mut Vec<AsmItem>)) {
    for item in items.iter_mut() {
        if let AsmItem::Function { body, .. } = item {
            f(body);
        }
    }
}

/// Rewrite adjacent instruction pairs. `f` sees the pair and returns what
/// should replace the second one (`None` keeps it, `Some(None)` deletes it).
fn rewrite_pairs(items: &mut Vec<AsmItem>, f: impl Fn(&X86Instr, &X86Instr) -> Option<Option<X86Instr>>) {
    let mut i = 0;
    while i + 1 < items.len() {
        let action = match (items[i].as_instr(), items[i + 1].as_instr()) {
            (Some(a), Some(b)) => f(a, b),
            _ => None,
        };
        match action {
            Some(None) => {
                items.remove(i + 1);
            }
            Some(Some(replacement)) => {
                items[i + 1] = AsmItem::instr(replacement);
                i += 1;
            }
            None => i += 1,
        }
    }
}

// ============================================================================
// Move peepholes
// ============================================================================

/// Removes `mov r, r`, which coalesced moves leave behind.
struct SelfMoveEliminator;

impl AsmPass for SelfMoveEliminator {
    fn run(&self, items: &mut Vec<AsmItem>) {
        for_each_body(items, |body| {
            body.retain(|item| {
                !matches!(
                    item.as_instr(),
                    Some(X86Instr::Mov { dst: Operand::Reg(d), src: Operand::Reg(s) }) if d == s
                )
            })
        });
    }
}

/// Removes the second of `mov a, b; mov b, a`.
struct InverseMoveEliminator;

impl AsmPass for InverseMoveEliminator {
    fn run(&self, items: &mut Vec<AsmItem>) {
        for_each_body(items, |body| {
            rewrite_pairs(body, |first, second| match (first, second) {
                (
                    X86Instr::Mov { dst: Operand::Reg(a), src: Operand::Reg(b) },
                    X86Instr::Mov { dst: Operand::Reg(c), src: Operand::Reg(d) },
                ) if a == d && b == c => Some(None),
                _ => None,
            })
        });
    }
}

/// Forwards a stored register to an immediately following load of the same
/// location, and drops a store of a value just loaded from that location.
struct StoreReloadEliminator;

impl AsmPass for StoreReloadEliminator {
    fn run(&self, items: &mut Vec<AsmItem>) {
        for_each_body(items, |body| {
            rewrite_pairs(body, |first, second| match (first, second) {
                // mov [m], r ; mov r2, [m]
                (
                    X86Instr::Mov { dst: Operand::Mem(m1), src: Operand::Reg(r) },
                    X86Instr::Mov { dst: Operand::Reg(r2), src: Operand::Mem(m2) },
                ) if m1 == m2 && !m1.uses_register(*r) => {
                    if r == r2 {
                        Some(None)
                    } else {
                        Some(Some(X86Instr::mov(*r2, *r)))
                    }
                }
                // mov r, [m] ; mov [m], r
                (
                    X86Instr::Mov { dst: Operand::Reg(r), src: Operand::Mem(m1) },
                    X86Instr::Mov { dst: Operand::Mem(m2), src: Operand::Reg(r2) },
                ) if m1 == m2 && r == r2 && !m1.uses_register(*r) => Some(None),
                _ => None,
            })
        });
    }
}

// ============================================================================
// Jump optimizer: removes fallthrough jumps
// ============================================================================

/// Removes `jmp X` instructions that are immediately followed by label `X`.
struct JumpOptimizer;

impl JumpOptimizer {
    fn eliminate_fallthrough_jumps(items: &mut Vec<AsmItem>) {
        let mut i = 0;
        while i + 1 < items.len() {
            let falls_through = match (items[i].as_instr().and_then(X86Instr::jump_target), &items[i + 1]) {
                (Some(target), AsmItem::Label(label)) => target == label,
                _ => false,
            };
            if falls_through {
                items.remove(i);
            } else {
                i += 1;
            }
        }
    }
}

impl AsmPass for JumpOptimizer {
    fn run(&self, items: &mut Vec<AsmItem>) {
        for item in items.iter_mut() {
            if let AsmItem::Function { body, epilogue, .. } = item {
                Self::eliminate_fallthrough_jumps(body);

                // Body→epilogue boundary.
                let into_epilogue = match (
                    body.last().and_then(AsmItem::as_instr).and_then(X86Instr::jump_target),
                    epilogue.first(),
                ) {
                    (Some(target), Some(AsmItem::Label(label))) => target == label,
                    _ => false,
                };
                if into_epilogue {
                    body.pop();
                }
            }
        }
    }
}

// ============================================================================
// Frame optimizer: omits frame setup for trivial leaf functions
// ============================================================================

/// Omits the frame of leaf functions with no spill slots, no callee-saved
/// registers and no stack-passed arguments.
struct FrameOptimizer;

impl AsmPass for FrameOptimizer {
    fn run(&self, items: &mut Vec<AsmItem>) {
        for item in items.iter_mut() {
            if let AsmItem::Function { prologue, body, epilogue, frame_size, used_callee, is_leaf, .. } = item {
                let touches_frame = body
                    .iter()
                    .filter_map(AsmItem::as_instr)
                    .any(|i| i.uses_register(PhysReg::FRAME_PTR) || i.uses_register(PhysReg::STACK_PTR));
                if *is_leaf && *frame_size == 0 && used_callee.is_empty() && !touches_frame {
                    prologue.clear();
                    epilogue.clear();
                    epilogue.push(AsmItem::Label(EPILOGUE_LABEL.to_string()));
                    epilogue.push(AsmItem::instr(X86Instr::Ret));
                }
            }
        }
    }
}

// ============================================================================
// Return inliner: inlines trivial epilogues into function bodies
// ============================================================================

/// Where the epilogue is just `.epilogue: ret`, every `jmp .epilogue` in the
/// body becomes `ret` and the label goes away.
struct ReturnInliner;

impl AsmPass for ReturnInliner {
    fn run(&self, items: &mut Vec<AsmItem>) {
        for item in items.iter_mut() {
            if let AsmItem::Function { body, epilogue, .. } = item {
                let trivial = epilogue.len() == 2
                    && matches!(&epilogue[0], AsmItem::Label(l) if l == EPILOGUE_LABEL)
                    && matches!(epilogue[1].as_instr(), Some(X86Instr::Ret));
                if !trivial {
                    continue;
                }
                for body_item in body.iter_mut() {
                    if body_item.as_instr().and_then(X86Instr::jump_target) == Some(EPILOGUE_LABEL) {
                        *body_item = AsmItem::instr(X86Instr::Ret);
                    }
                }
                epilogue.remove(0);
            }
        }
    }
}

// ============================================================================
// Label cleanup: drops block labels nothing branches to
// ============================================================================

/// Removes block labels left without a branch to them, such as the first
/// body block that the entry falls into.
struct UnusedLabelEliminator;

impl AsmPass for UnusedLabelEliminator {
    fn run(&self, items: &mut Vec<AsmItem>) {
        for_each_body(items, |body| {
            let targets: HashSet<String> = body
                .iter()
                .filter_map(|i| i.as_instr().and_then(X86Instr::branch_target))
                .map(str::to_string)
                .collect();
            body.retain(|item| match item {
                AsmItem::Label(l) => !l.starts_with(BLOCK_LABEL_PREFIX) || targets.contains(l),
                _ => true,
            });
        });
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all optimization passes on the assembly output.
pub fn optimize(items: &mut Vec<AsmItem>) {
    let mut pm = PassManager::new();
    pm.add(Box::new(SelfMoveEliminator));
    pm.add(Box::new(InverseMoveEliminator));
    pm.add(Box::new(StoreReloadEliminator));
    pm.add(Box::new(JumpOptimizer));
    pm.add(Box::new(FrameOptimizer));
    pm.add(Box::new(ReturnInliner));
    pm.add(Box::new(UnusedLabelEliminator));
    pm.run_all(items);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::instruction::{Cond, Mem};

    fn func(body: Vec<AsmItem>, frame_size: usize, is_leaf: bool) -> AsmItem {
        AsmItem::Function {
            name: "f".to_string(),
            prologue: vec![
                AsmItem::instr(X86Instr::Push(PhysReg::Rbp.into())),
                AsmItem::instr(X86Instr::mov(PhysReg::Rbp, PhysReg::Rsp)),
            ],
            body,
            epilogue: vec![
                AsmItem::Label(EPILOGUE_LABEL.to_string()),
                AsmItem::instr(X86Instr::Pop(PhysReg::Rbp)),
                AsmItem::instr(X86Instr::Ret),
            ],
            frame_size,
            used_callee: Vec::new(),
            is_leaf,
        }
    }

    fn body_of(item: &AsmItem) -> Vec<String> {
        match item {
            AsmItem::Function { body, .. } => body
                .iter()
                .map(|i| match i {
                    AsmItem::Label(l) => format!("{l}:"),
                    other => other.as_instr().map(|x| x.to_string().trim().to_string()).unwrap_or_default(),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    #[test]
    fn self_and_inverse_moves_go_away() {
        let mut items = vec![func(
            vec![
                AsmItem::instr(X86Instr::mov(PhysReg::Rax, PhysReg::Rax)),
                AsmItem::instr(X86Instr::mov(PhysReg::Rbx, PhysReg::Rcx)),
                AsmItem::instr(X86Instr::mov(PhysReg::Rcx, PhysReg::Rbx)),
                AsmItem::instr(X86Instr::Call("g".to_string())),
            ],
            0,
            false,
        )];
        optimize(&mut items);
        assert_eq!(body_of(&items[0]), vec!["mov rbx, rcx", "call g"]);
    }

    #[test]
    fn reload_after_store_is_forwarded() {
        let slot = || Mem::base(PhysReg::Rbp, -8);
        let mut items = vec![func(
            vec![
                AsmItem::instr(X86Instr::store(slot(), PhysReg::Rax.into())),
                AsmItem::instr(X86Instr::load(PhysReg::Rcx, slot())),
                AsmItem::instr(X86Instr::load(PhysReg::Rdx, slot())),
                AsmItem::instr(X86Instr::store(slot(), PhysReg::Rdx.into())),
            ],
            16,
            true,
        )];
        optimize(&mut items);
        assert_eq!(body_of(&items[0]), vec!["mov [rbp - 8], rax", "mov rcx, rax", "mov rdx, [rbp - 8]"]);
    }

    #[test]
    fn fallthrough_jumps_are_dropped() {
        let mut items = vec![func(
            vec![
                AsmItem::instr(X86Instr::jmp(".bb1_next")),
                AsmItem::Label(".bb1_next".to_string()),
                AsmItem::instr(X86Instr::Call("g".to_string())),
                AsmItem::instr(X86Instr::jmp(EPILOGUE_LABEL)),
            ],
            0,
            false,
        )];
        optimize(&mut items);
        assert_eq!(body_of(&items[0]), vec!["call g"], "nothing jumps to .bb1_next any more");
        match &items[0] {
            AsmItem::Function { prologue, .. } => assert_eq!(prologue.len(), 2, "non-leaf keeps its frame"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn trivial_leaf_loses_frame_and_returns_directly() {
        let mut items = vec![func(
            vec![
                AsmItem::instr(X86Instr::mov(PhysReg::Rax, PhysReg::Rdi)),
                AsmItem::instr(X86Instr::jmp(EPILOGUE_LABEL)),
                AsmItem::Label(".bb2_other".to_string()),
                AsmItem::instr(X86Instr::mov_imm(PhysReg::Rax, 0)),
                AsmItem::instr(X86Instr::jmp(EPILOGUE_LABEL)),
            ],
            0,
            true,
        )];
        optimize(&mut items);
        assert_eq!(body_of(&items[0]), vec!["mov rax, rdi", "ret", "mov rax, 0"]);
        match &items[0] {
            AsmItem::Function { prologue, epilogue, .. } => {
                assert!(prologue.is_empty());
                assert_eq!(epilogue.len(), 1);
                assert!(matches!(epilogue[0].as_instr(), Some(X86Instr::Ret)));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn only_branch_targets_keep_labels() {
        let mut items = vec![func(
            vec![
                AsmItem::Label(".bb0_entry".to_string()),
                AsmItem::instr(X86Instr::Jcc { cond: Cond::L, target: ".bb3_loop".to_string() }),
                AsmItem::Label(".bb2_after".to_string()),
                AsmItem::instr(X86Instr::Call("g".to_string())),
                AsmItem::Label(".bb3_loop".to_string()),
                AsmItem::instr(X86Instr::Call("h".to_string())),
                AsmItem::instr(X86Instr::jmp(".bb3_loop")),
            ],
            0,
            false,
        )];
        optimize(&mut items);
        assert_eq!(body_of(&items[0]), vec!["jl .bb3_loop", "call g", ".bb3_loop:", "call h", "jmp .bb3_loop"]);
    }

    #[test]
    fn leaf_with_slots_keeps_frame() {
        let mut items = vec![func(
            vec![AsmItem::instr(X86Instr::store(Mem::base(PhysReg::Rbp, -8), Operand::Imm(1)))],
            16,
            true,
        )];
        optimize(&mut items);
        match &items[0] {
            AsmItem::Function { prologue, epilogue, .. } => {
                assert_eq!(prologue.len(), 2);
                assert_eq!(epilogue.len(), 3);
            }
            _ => unreachable!(),
        }
    }
}
