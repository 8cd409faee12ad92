//! Simplify/select coloring with optimistic spilling and move biasing.

use super::interference::InterferenceGraph;
use crate::backend::abi::PhysReg;
use crate::ir::{Reg, VReg};
use std::collections::{BTreeMap, BTreeSet};

pub type Coloring = BTreeMap<VReg, PhysReg>;

/// Color every node of `graph` from `palette`.
///
/// On failure returns the nodes to spill before the next round. Nodes in
/// `unspillable` are never returned; when one of them cannot be colored its
/// spillable neighbors are returned instead.
pub fn color(
    graph: &InterferenceGraph,
    palette: &[PhysReg],
    unspillable: &BTreeSet<VReg>,
) -> Result<Coloring, BTreeSet<VReg>> {
    let k = palette.len();
    let nodes: Vec<VReg> = graph.nodes().collect();
    let mut degree: BTreeMap<VReg, usize> = nodes
        .iter()
        .map(|&v| {
            let phys = graph.forbidden(v).iter().filter(|p| palette.contains(p)).count();
            (v, graph.neighbors(v).len() + phys)
        })
        .collect();

    // ── Simplify ────────────────────────────────────────────────────────
    let mut stack = Vec::with_capacity(nodes.len());
    let mut removed = BTreeSet::new();
    while removed.len() < nodes.len() {
        let candidate = degree
            .iter()
            .filter(|(v, _)| !removed.contains(*v))
            .find(|(_, d)| **d < k)
            .map(|(v, _)| *v);
        // Blocked: push the likeliest spill optimistically.
        let v = match candidate {
            Some(v) => v,
            None => match spill_candidate(&degree, &removed, unspillable) {
                Some(v) => v,
                None => break,
            },
        };
        removed.insert(v);
        stack.push(v);
        for n in graph.neighbors(v) {
            if let Some(d) = degree.get_mut(n) {
                *d = d.saturating_sub(1);
            }
        }
    }

    // ── Select ──────────────────────────────────────────────────────────
    let mut colors = Coloring::new();
    let mut spills = BTreeSet::new();
    while let Some(v) = stack.pop() {
        let taken: BTreeSet<PhysReg> = graph
            .neighbors(v)
            .iter()
            .filter_map(|n| colors.get(n).copied())
            .chain(graph.forbidden(v).iter().copied())
            .collect();
        let free: Vec<PhysReg> = palette.iter().copied().filter(|p| !taken.contains(p)).collect();

        if free.is_empty() {
            if unspillable.contains(&v) {
                spills.extend(graph.neighbors(v).iter().filter(|n| !unspillable.contains(*n)));
            } else {
                spills.insert(v);
            }
            continue;
        }
        let pick = preferred(graph, v, &colors, &free).unwrap_or(free[0]);
        colors.insert(v, pick);
    }

    if spills.is_empty() {
        Ok(colors)
    } else {
        Err(spills)
    }
}

/// Highest degree first, lowest register number on ties; spill temporaries
/// only when nothing else is left.
fn spill_candidate(
    degree: &BTreeMap<VReg, usize>,
    removed: &BTreeSet<VReg>,
    unspillable: &BTreeSet<VReg>,
) -> Option<VReg> {
    let best = |allow_temps: bool| {
        degree
            .iter()
            .filter(|(v, _)| !removed.contains(*v) && (allow_temps || !unspillable.contains(*v)))
            .max_by(|(a, da), (b, db)| da.cmp(db).then(b.cmp(a)))
            .map(|(v, _)| *v)
    };
    best(false).or_else(|| best(true))
}

/// A free register some move partner of `v` already lives in.
fn preferred(graph: &InterferenceGraph, v: VReg, colors: &Coloring, free: &[PhysReg]) -> Option<PhysReg> {
    graph
        .moves
        .iter()
        .filter_map(|&(a, b)| {
            let other = if a == v {
                b
            } else if b == Reg::Virt(v) {
                Reg::Virt(a)
            } else {
                return None;
            };
            match other {
                Reg::Phys(p) => Some(p),
                Reg::Virt(w) => colors.get(&w).copied(),
            }
        })
        .find(|p| free.contains(p))
}
