use super::IrPass;
use crate::ir::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Lays out the static data section.
///
/// - In functions that make no calls, global variables are cached in a
///   register: loaded once on entry and written back before each return.
/// - Identical string literals are coalesced into one symbol.
/// - Statics nothing references are dropped.
/// - Every remaining static gets a stable, unique label.
pub struct StaticDataProcessor;

impl IrPass for StaticDataProcessor {
    fn name(&self) -> &'static str {
        "static-data"
    }

    fn run(&mut self, root: &mut IrRoot) {
        for func in &mut root.functions {
            if !func.has_calls() {
                cache_globals(func, &root.statics);
            }
        }
        coalesce_strings(root);
        let before = root.statics.len();
        drop_unreferenced(root);
        assign_labels(root);
        debug!(kept = root.statics.len(), dropped = before - root.statics.len(), "static data laid out");
    }
}

fn for_each_instr_mut(root: &mut IrRoot, mut f: impl FnMut(&mut Instr)) {
    for func in &mut root.functions {
        for block in &mut func.blocks {
            block.instrs.iter_mut().for_each(&mut f);
        }
    }
}

/// Keep globals of a call-free function in registers for its whole body.
pub fn cache_globals(func: &mut IrFunction, statics: &[StaticData]) {
    let mut read = BTreeSet::new();
    let mut written = BTreeSet::new();
    for instr in func.instrs() {
        match instr {
            Instr::Load { addr: Address::Static(s), .. } => {
                read.insert(*s);
            }
            Instr::Store { addr: Address::Static(s), .. } => {
                written.insert(*s);
            }
            _ => {}
        }
    }
    let globals: BTreeSet<StaticId> = read
        .union(&written)
        .copied()
        .filter(|s| statics.get(s.0).is_some_and(|d| d.init == StaticInit::Word))
        .collect();
    if globals.is_empty() {
        return;
    }

    let cache: BTreeMap<StaticId, VReg> =
        globals.iter().map(|s| (*s, func.new_vreg(&statics[s.0].name))).collect();

    let layout = func.layout.clone();
    for bb in layout {
        let instrs = std::mem::take(&mut func.block_mut(bb).instrs);
        let mut out = Vec::with_capacity(instrs.len());
        for instr in instrs {
            match instr {
                Instr::Load { dst, addr: Address::Static(s) } if cache.contains_key(&s) => {
                    out.push(Instr::Move { dst, src: cache[&s].into() });
                }
                Instr::Store { addr: Address::Static(s), src } if cache.contains_key(&s) => {
                    out.push(Instr::Move { dst: cache[&s].into(), src });
                }
                Instr::Return { value } => {
                    for s in &written {
                        if let Some(c) = cache.get(s) {
                            out.push(Instr::Store { addr: Address::Static(*s), src: (*c).into() });
                        }
                    }
                    out.push(Instr::Return { value });
                }
                other => out.push(other),
            }
        }
        func.block_mut(bb).instrs = out;
    }

    let old_entry = func.entry;
    let entry = func.new_block("global_cache");
    for (s, c) in &cache {
        func.block_mut(entry).instrs.push(Instr::Load { dst: (*c).into(), addr: Address::Static(*s) });
    }
    func.block_mut(entry).instrs.push(Instr::Jump { target: old_entry });
    func.entry = entry;
    func.layout.retain(|b| *b != entry);
    func.layout.insert(0, entry);
}

fn coalesce_strings(root: &mut IrRoot) {
    let mut first: HashMap<String, StaticId> = HashMap::new();
    let mut remap: HashMap<StaticId, StaticId> = HashMap::new();
    for (i, s) in root.statics.iter().enumerate() {
        if let StaticInit::Str(text) = &s.init {
            let canonical = *first.entry(text.clone()).or_insert(StaticId(i));
            if canonical.0 != i {
                remap.insert(StaticId(i), canonical);
            }
        }
    }
    if remap.is_empty() {
        return;
    }
    for_each_instr_mut(root, |instr| {
        instr.for_each_static_mut(|s| {
            if let Some(c) = remap.get(s) {
                *s = *c;
            }
        })
    });
}

fn drop_unreferenced(root: &mut IrRoot) {
    let mut used = vec![false; root.statics.len()];
    for_each_instr_mut(root, |instr| instr.for_each_static_mut(|s| used[s.0] = true));

    let mut renumber = vec![None; root.statics.len()];
    let mut kept = Vec::new();
    for (i, s) in std::mem::take(&mut root.statics).into_iter().enumerate() {
        if used[i] {
            renumber[i] = Some(StaticId(kept.len()));
            kept.push(s);
        }
    }
    root.statics = kept;
    for_each_instr_mut(root, |instr| {
        instr.for_each_static_mut(|s| {
            if let Some(n) = renumber[s.0] {
                *s = n;
            }
        })
    });
}

fn assign_labels(root: &mut IrRoot) {
    for (i, s) in root.statics.iter_mut().enumerate() {
        s.label = match s.init {
            StaticInit::Word => format!("__static_var_{i}_{}", sanitize(&s.name)),
            StaticInit::Str(_) => format!("__static_str_{i}"),
        };
    }
}

fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
}
