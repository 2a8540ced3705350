//! Kernel enumeration and isolated cutout extraction.

use crate::graph::{Node, NodeId, NodeKind, Program, State};
use anyhow::{anyhow, ensure, Result};
use layoutforge_layout::ArrayStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    Map,
    Library,
    Tasklet,
}

/// A tunable unit of a program, addressed by state and node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelUnit {
    /// Unique within the program; used as the cache key.
    pub label: String,
    pub state: usize,
    pub node: NodeId,
    pub kind: UnitKind,
}

impl Program {
    /// Outermost maps, library nodes and tasklets, in state/node order.
    ///
    /// Units nested in another map scope are skipped. Labels that repeat
    /// across the program are qualified with their state and node id.
    pub fn kernels(&self) -> Vec<KernelUnit> {
        let mut units = Vec::new();
        for (state_idx, state) in self.states.iter().enumerate() {
            for (id, node) in state.nodes.iter().enumerate() {
                if node.scope.is_some() {
                    continue;
                }
                let (label, kind) = match &node.kind {
                    NodeKind::MapEntry { label, .. } => (label, UnitKind::Map),
                    NodeKind::Library { label } => (label, UnitKind::Library),
                    NodeKind::Tasklet { label } => (label, UnitKind::Tasklet),
                    NodeKind::Access { .. } | NodeKind::MapExit { .. } => continue,
                };
                units.push(KernelUnit {
                    label: label.clone(),
                    state: state_idx,
                    node: id,
                    kind,
                });
            }
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for unit in &units {
            *counts.entry(unit.label.clone()).or_default() += 1;
        }
        for unit in &mut units {
            if counts[&unit.label] > 1 {
                unit.label = format!("{}@{}.{}", unit.label, self.states[unit.state].name, unit.node);
            }
        }
        units
    }

    pub fn kernel(&self, label: &str) -> Option<KernelUnit> {
        self.kernels().into_iter().find(|unit| unit.label == label)
    }

    /// Extract `unit` and its immediate data dependencies as a standalone program.
    ///
    /// Access nodes adjacent to the unit become the cutout's arguments and are
    /// marked non-transient. Arrays only touched inside the unit's scope keep
    /// their original transient flag.
    pub fn cutout(&self, unit: &KernelUnit) -> Result<Program> {
        let state = self
            .states
            .get(unit.state)
            .ok_or_else(|| anyhow!("kernel `{}` refers to missing state {}", unit.label, unit.state))?;
        let node = state
            .nodes
            .get(unit.node)
            .ok_or_else(|| anyhow!("kernel `{}` refers to missing node {}", unit.label, unit.node))?;
        ensure!(
            node.scope.is_none(),
            "kernel `{}` is nested inside another scope",
            unit.label
        );

        let inner: BTreeSet<NodeId> = match node.kind {
            NodeKind::MapEntry { .. } => state.scope_subgraph(unit.node).into_iter().collect(),
            NodeKind::Library { .. } | NodeKind::Tasklet { .. } => BTreeSet::from([unit.node]),
            _ => anyhow::bail!("node {} of state `{}` is not a tunable unit", unit.node, state.name),
        };

        let boundary: BTreeSet<NodeId> = inner
            .iter()
            .flat_map(|&id| state.neighbors(id))
            .filter(|id| !inner.contains(id) && state.nodes[*id].data().is_some())
            .collect();

        let kept: Vec<NodeId> = inner.union(&boundary).copied().collect();
        let remap: BTreeMap<NodeId, NodeId> = kept
            .iter()
            .enumerate()
            .map(|(new, &old)| (old, new))
            .collect();

        let mut cut_state = State::new(format!("{}_cutout", unit.label));
        for &old in &kept {
            let original = &state.nodes[old];
            let kind = match &original.kind {
                NodeKind::MapEntry { label, exit } => NodeKind::MapEntry {
                    label: label.clone(),
                    exit: remap[exit],
                },
                NodeKind::MapExit { entry } => NodeKind::MapExit { entry: remap[entry] },
                other => other.clone(),
            };
            // Boundary nodes and the unit itself live at the cutout's top level.
            let scope = original
                .scope
                .filter(|_| inner.contains(&old))
                .and_then(|scope| remap.get(&scope).copied());
            cut_state.nodes.push(Node { kind, scope });
        }
        for edge in &state.edges {
            if let (Some(&src), Some(&dst)) = (remap.get(&edge.src), remap.get(&edge.dst)) {
                cut_state.add_edge(src, dst);
            }
        }

        let mut arrays = ArrayStore::new();
        for (_, data) in cut_state.data_nodes() {
            if !arrays.contains(data) {
                arrays.insert(data, self.arrays.require(data)?.clone());
            }
        }
        for &old in &boundary {
            if let Some(data) = state.nodes[old].data() {
                arrays.set_transient(data, false)?;
            }
        }

        let cutout = Program {
            name: unit.label.clone(),
            arrays,
            states: vec![cut_state],
        };
        cutout.validate()?;
        Ok(cutout)
    }
}
