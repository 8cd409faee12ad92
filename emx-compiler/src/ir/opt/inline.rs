use super::IrPass;
use crate::ir::*;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Callees larger than this many instructions are never inlined.
pub const CALLEE_INSTR_LIMIT: usize = 64;
/// Inlining stops once a caller would grow past this many instructions.
pub const CALLER_INSTR_LIMIT: usize = 4096;

// ============================================================================
// Call graph
// ============================================================================

/// Direct call edges between IR functions.
pub struct CallGraph {
    edges: Vec<BTreeSet<usize>>,
}

impl CallGraph {
    pub fn build(root: &IrRoot) -> Self {
        let edges = root
            .functions
            .iter()
            .map(|f| {
                f.instrs()
                    .filter_map(|i| match i {
                        Instr::Call { callee: Callee::Function(id), .. } => Some(id.0),
                        _ => None,
                    })
                    .collect()
            })
            .collect();
        Self { edges }
    }

    pub fn callees(&self, f: FuncId) -> impl Iterator<Item = FuncId> + '_ {
        self.edges[f.0].iter().map(|&i| FuncId(i))
    }

    /// Strongly connected components (Tarjan), callees before callers.
    pub fn sccs(&self) -> Vec<Vec<FuncId>> {
        struct Tarjan<'a> {
            edges: &'a [BTreeSet<usize>],
            index: Vec<Option<usize>>,
            low: Vec<usize>,
            on_stack: Vec<bool>,
            stack: Vec<usize>,
            next: usize,
            out: Vec<Vec<FuncId>>,
        }

        impl Tarjan<'_> {
            fn visit(&mut self, v: usize) {
                self.index[v] = Some(self.next);
                self.low[v] = self.next;
                self.next += 1;
                self.stack.push(v);
                self.on_stack[v] = true;

                let edges = self.edges;
                for &w in edges[v].iter() {
                    match self.index[w] {
                        None => {
                            self.visit(w);
                            self.low[v] = self.low[v].min(self.low[w]);
                        }
                        Some(iw) if self.on_stack[w] => self.low[v] = self.low[v].min(iw),
                        Some(_) => {}
                    }
                }

                if Some(self.low[v]) == self.index[v] {
                    let mut scc = Vec::new();
                    while let Some(w) = self.stack.pop() {
                        self.on_stack[w] = false;
                        scc.push(FuncId(w));
                        if w == v {
                            break;
                        }
                    }
                    self.out.push(scc);
                }
            }
        }

        let n = self.edges.len();
        let mut t = Tarjan {
            edges: &self.edges,
            index: vec![None; n],
            low: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next: 0,
            out: Vec::new(),
        };
        for v in 0..n {
            if t.index[v].is_none() {
                t.visit(v);
            }
        }
        t.out
    }

    /// Functions that can reach themselves through calls, directly or through
    /// any chain of other functions.
    pub fn recursive_functions(&self) -> HashSet<FuncId> {
        let mut out = HashSet::new();
        for scc in self.sccs() {
            let self_loop = scc.len() == 1 && self.edges[scc[0].0].contains(&scc[0].0);
            if scc.len() > 1 || self_loop {
                out.extend(scc);
            }
        }
        out
    }
}

// ============================================================================
// Inliner
// ============================================================================

/// Replaces eligible call sites with renamed copies of the callee body.
///
/// A callee is eligible when it is outside every call-graph cycle, small
/// enough, and the caller stays under its growth cap. Callers are visited
/// bottom-up, so inlined bodies have already had their own calls inlined and
/// copies are never rescanned.
pub struct FunctionInliner {
    pub callee_limit: usize,
    pub caller_limit: usize,
}

impl Default for FunctionInliner {
    fn default() -> Self {
        Self { callee_limit: CALLEE_INSTR_LIMIT, caller_limit: CALLER_INSTR_LIMIT }
    }
}

impl IrPass for FunctionInliner {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run(&mut self, root: &mut IrRoot) {
        let graph = CallGraph::build(root);
        let recursive = graph.recursive_functions();
        for scc in graph.sccs() {
            for caller in scc {
                let n = self.inline_into(root, caller, &recursive);
                if n > 0 {
                    debug!(function = %root.functions[caller.0].name, sites = n, "inlined calls");
                }
            }
        }
    }
}

impl FunctionInliner {
    fn inline_into(&self, root: &mut IrRoot, caller: FuncId, recursive: &HashSet<FuncId>) -> usize {
        let mut inlined = 0;
        let mut pos = 0;
        while pos < root.functions[caller.0].layout.len() {
            let bb = root.functions[caller.0].layout[pos];
            let caller_size = root.functions[caller.0].instr_count();
            let site = root.functions[caller.0].block(bb).instrs.iter().position(|instr| match instr {
                Instr::Call { callee: Callee::Function(c), .. } => {
                    let size = root.functions[c.0].instr_count();
                    *c != caller
                        && !recursive.contains(c)
                        && size <= self.callee_limit
                        && caller_size + size <= self.caller_limit
                }
                _ => false,
            });

            let Some(idx) = site else {
                pos += 1;
                continue;
            };
            let callee = match &root.functions[caller.0].block(bb).instrs[idx] {
                Instr::Call { callee: Callee::Function(c), .. } => root.functions[c.0].clone(),
                _ => break,
            };
            let func = &mut root.functions[caller.0];
            match splice_call(func, bb, idx, &callee) {
                Some(join) => {
                    inlined += 1;
                    pos = func.layout.iter().position(|b| *b == join).unwrap_or(pos + 1);
                }
                None => pos += 1,
            }
        }
        inlined
    }
}

/// Replace the call at `caller[bb][idx]` with a copy of `callee`.
///
/// The block is split after the call: the instructions that followed it move
/// to a new join block, arguments are moved into renamed parameter
/// registers, and every `return` in the copy becomes a move into the call's
/// destination plus a jump to the join block. Returns the join block.
pub fn splice_call(caller: &mut IrFunction, bb: BlockId, idx: usize, callee: &IrFunction) -> Option<BlockId> {
    let instrs = &mut caller.block_mut(bb).instrs;
    if idx >= instrs.len() {
        return None;
    }
    let tail = instrs.split_off(idx + 1);
    let (dst, args) = match instrs.pop() {
        Some(Instr::Call { dst, args, .. }) => (dst, args),
        Some(other) => {
            instrs.push(other);
            instrs.extend(tail);
            return None;
        }
        None => return None,
    };

    let vmap: Vec<VReg> = (0..callee.vreg_count())
        .map(|i| caller.new_vreg(callee.vreg_hint(VReg(i as u32))))
        .collect();

    let layout_before = caller.layout.len();
    let mut order: Vec<BlockId> = callee.layout.clone();
    order.extend((0..callee.blocks.len()).map(BlockId).filter(|b| !callee.layout.contains(b)));
    let mut bmap = vec![BlockId(0); callee.blocks.len()];
    for &b in &order {
        let name = format!("{}_{}", callee.name, callee.block(b).name);
        bmap[b.0] = caller.new_block(&name);
    }
    let join = caller.new_block("inline_join");
    caller.block_mut(join).instrs = tail;

    let rename = |v: &mut RegValue| {
        if let RegValue::Vreg(r) = v {
            *r = vmap[r.0 as usize];
        }
    };

    for &b in &order {
        let mut copied = Vec::with_capacity(callee.block(b).instrs.len());
        for instr in &callee.block(b).instrs {
            let mut instr = instr.clone();
            instr.for_each_operand_mut(rename);
            instr.map_targets(|t| bmap[t.0]);
            match instr {
                Instr::Return { value } => {
                    if let (Some(d), Some(v)) = (dst, value) {
                        copied.push(Instr::Move { dst: d, src: v });
                    }
                    copied.push(Instr::Jump { target: join });
                }
                other => copied.push(other),
            }
        }
        caller.block_mut(bmap[b.0]).instrs = copied;
    }

    let entry_block = caller.block_mut(bb);
    for (p, a) in callee.params.iter().zip(args) {
        entry_block.instrs.push(Instr::Move { dst: vmap[p.0 as usize].into(), src: a });
    }
    entry_block.instrs.push(Instr::Jump { target: bmap[callee.entry.0] });

    // Keep the copy next to the call site in the emission order.
    let added = caller.layout.split_off(layout_before);
    let at = caller.layout.iter().position(|b| *b == bb).map_or(caller.layout.len(), |p| p + 1);
    caller.layout.splice(at..at, added);
    Some(join)
}
