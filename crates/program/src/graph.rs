//! Dataflow program model: states of access, scope and compute nodes.

use anyhow::{bail, ensure, Result};
use layoutforge_layout::{ArrayDescriptor, ArrayStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Read or write of a named array.
    Access { data: String },
    /// Opens a parallel map scope closed by `exit`.
    MapEntry { label: String, exit: NodeId },
    MapExit { entry: NodeId },
    Tasklet { label: String },
    Library { label: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Innermost enclosing map entry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<NodeId>,
}

impl Node {
    pub fn label(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::MapEntry { label, .. }
            | NodeKind::Tasklet { label }
            | NodeKind::Library { label } => Some(label),
            NodeKind::Access { .. } | NodeKind::MapExit { .. } => None,
        }
    }

    pub fn data(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Access { data } => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub src: NodeId,
    pub dst: NodeId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn push(&mut self, kind: NodeKind, scope: Option<NodeId>) -> NodeId {
        self.nodes.push(Node { kind, scope });
        self.nodes.len() - 1
    }

    pub fn add_access(&mut self, data: impl Into<String>) -> NodeId {
        self.push(NodeKind::Access { data: data.into() }, None)
    }

    pub fn add_access_in(&mut self, data: impl Into<String>, scope: NodeId) -> NodeId {
        self.push(NodeKind::Access { data: data.into() }, Some(scope))
    }

    /// Add a map scope; returns `(entry, exit)`.
    pub fn add_map(&mut self, label: impl Into<String>, scope: Option<NodeId>) -> (NodeId, NodeId) {
        let entry = self.nodes.len();
        let exit = entry + 1;
        self.push(
            NodeKind::MapEntry {
                label: label.into(),
                exit,
            },
            scope,
        );
        self.push(NodeKind::MapExit { entry }, scope);
        (entry, exit)
    }

    pub fn add_tasklet(&mut self, label: impl Into<String>, scope: Option<NodeId>) -> NodeId {
        self.push(NodeKind::Tasklet { label: label.into() }, scope)
    }

    pub fn add_library(&mut self, label: impl Into<String>, scope: Option<NodeId>) -> NodeId {
        self.push(NodeKind::Library { label: label.into() }, scope)
    }

    pub fn add_edge(&mut self, src: NodeId, dst: NodeId) {
        self.edges.push(Edge { src, dst });
    }

    pub fn in_degree(&self, node: NodeId) -> usize {
        self.edges.iter().filter(|edge| edge.dst == node).count()
    }

    pub fn neighbors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.edges.iter().filter_map(move |edge| {
            if edge.src == node {
                Some(edge.dst)
            } else if edge.dst == node {
                Some(edge.src)
            } else {
                None
            }
        })
    }

    /// Access nodes as `(id, array name)`.
    pub fn data_nodes(&self) -> impl Iterator<Item = (NodeId, &str)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, node)| node.data().map(|data| (id, data)))
    }

    /// Whether `node` sits anywhere inside the scope opened by `entry`.
    pub fn is_within(&self, node: NodeId, entry: NodeId) -> bool {
        let mut current = self.nodes.get(node).and_then(|n| n.scope);
        let mut hops = 0;
        while let Some(scope) = current {
            if scope == entry {
                return true;
            }
            hops += 1;
            if hops > self.nodes.len() {
                return false;
            }
            current = self.nodes.get(scope).and_then(|n| n.scope);
        }
        false
    }

    /// Entry, exit and every node nested inside the map opened by `entry`.
    pub fn scope_subgraph(&self, entry: NodeId) -> Vec<NodeId> {
        let exit = match self.nodes.get(entry).map(|n| &n.kind) {
            Some(NodeKind::MapEntry { exit, .. }) => Some(*exit),
            _ => None,
        };
        (0..self.nodes.len())
            .filter(|&id| id == entry || Some(id) == exit || self.is_within(id, entry))
            .collect()
    }

    pub fn validate(&self, arrays: &ArrayStore) -> Result<()> {
        let count = self.nodes.len();
        for edge in &self.edges {
            ensure!(
                edge.src < count && edge.dst < count,
                "state `{}`: edge {} -> {} references a missing node",
                self.name,
                edge.src,
                edge.dst
            );
        }

        for (id, node) in self.nodes.iter().enumerate() {
            if let Some(scope) = node.scope {
                ensure!(
                    scope < count,
                    "state `{}`: node {} is scoped by missing node {}",
                    self.name,
                    id,
                    scope
                );
                ensure!(
                    matches!(self.nodes.get(scope).map(|n| &n.kind), Some(NodeKind::MapEntry { .. })),
                    "state `{}`: node {} is scoped by {} which is not a map entry",
                    self.name,
                    id,
                    scope
                );
                ensure!(
                    !self.is_within(scope, id) && scope != id,
                    "state `{}`: node {} is in a scope cycle",
                    self.name,
                    id
                );
            }
            match &node.kind {
                NodeKind::Access { data } => {
                    ensure!(
                        arrays.contains(data),
                        "state `{}`: node {} reads unknown array `{}`",
                        self.name,
                        id,
                        data
                    );
                }
                NodeKind::MapEntry { exit, .. } => match self.nodes.get(*exit) {
                    Some(Node {
                        kind: NodeKind::MapExit { entry },
                        ..
                    }) if *entry == id => {}
                    _ => bail!("state `{}`: map entry {} has no matching exit", self.name, id),
                },
                NodeKind::MapExit { entry } => {
                    ensure!(
                        matches!(
                            self.nodes.get(*entry).map(|n| &n.kind),
                            Some(NodeKind::MapEntry { exit, .. }) if *exit == id
                        ),
                        "state `{}`: map exit {} has no matching entry",
                        self.name,
                        id
                    );
                }
                NodeKind::Tasklet { .. } | NodeKind::Library { .. } => {}
            }
        }
        Ok(())
    }
}

/// A dataflow program: array descriptors plus the states that use them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub arrays: ArrayStore,
    pub states: Vec<State>,
}

impl Program {
    pub fn builder(name: impl Into<String>) -> ProgramBuilder {
        ProgramBuilder::new(name)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let program: Program = serde_json::from_str(&json)?;
        program.validate()?;
        Ok(program)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.arrays.validate()?;
        for state in &self.states {
            state.validate(&self.arrays)?;
        }
        Ok(())
    }

    /// Whether any access node writes `array`.
    pub fn is_written(&self, array: &str) -> bool {
        self.states.iter().any(|state| {
            state
                .data_nodes()
                .any(|(id, data)| data == array && state.in_degree(id) > 0)
        })
    }

    /// Names of arrays referenced by at least one access node.
    pub fn accessed_arrays(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .states
            .iter()
            .flat_map(|state| state.data_nodes().map(|(_, data)| data))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProgramBuilder {
    name: String,
    arrays: ArrayStore,
    states: Vec<State>,
}

impl ProgramBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn array(mut self, name: impl Into<String>, shape: &[usize]) -> Self {
        self.arrays.insert(name, ArrayDescriptor::new(shape));
        self
    }

    pub fn transient(mut self, name: impl Into<String>, shape: &[usize]) -> Self {
        self.arrays.insert(name, ArrayDescriptor::transient(shape));
        self
    }

    pub fn state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    pub fn build(self) -> Result<Program> {
        let program = Program {
            name: self.name,
            arrays: self.arrays,
            states: self.states,
        };
        program.validate()?;
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn copy_state() -> State {
        let mut state = State::new("main");
        let a = state.add_access("A");
        let (entry, exit) = state.add_map("copy", None);
        let body = state.add_tasklet("assign", Some(entry));
        let b = state.add_access("B");
        state.add_edge(a, entry);
        state.add_edge(entry, body);
        state.add_edge(body, exit);
        state.add_edge(exit, b);
        state
    }

    #[test]
    fn test_builder_validates_arrays() {
        let result = Program::builder("p").array("A", &[4]).state(copy_state()).build();
        assert!(result.is_err());

        let program = Program::builder("p")
            .array("A", &[4])
            .array("B", &[4])
            .state(copy_state())
            .build()
            .unwrap();
        assert_eq!(program.accessed_arrays(), vec!["A", "B"]);
        assert!(program.is_written("B"));
        assert!(!program.is_written("A"));
    }

    #[test]
    fn test_scope_subgraph() {
        let state = copy_state();
        assert_eq!(state.scope_subgraph(1), vec![1, 2, 3]);
        assert!(state.is_within(3, 1));
        assert!(!state.is_within(0, 1));
    }

    #[test]
    fn test_dangling_scope_chain_is_an_error() {
        let program = Program::builder("p")
            .array("A", &[4])
            .array("B", &[4])
            .state(copy_state())
            .build()
            .unwrap();
        let mut json = serde_json::to_value(&program).unwrap();
        json["states"][0]["nodes"][1]["scope"] = serde_json::json!(99);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.json");
        fs::write(&path, json.to_string()).unwrap();

        let err = Program::load(&path).unwrap_err();
        assert!(err.to_string().contains("missing node 99"));
        assert!(!program.states[0].is_within(2, 99));
        assert!(!program.states[0].is_within(99, 1));
    }

    #[test]
    fn test_unmatched_map_exit_rejected() {
        let mut state = copy_state();
        state.nodes[2].kind = NodeKind::Tasklet {
            label: "oops".into(),
        };
        let arrays: ArrayStore = [
            ("A".to_string(), ArrayDescriptor::new(&[4])),
            ("B".to_string(), ArrayDescriptor::new(&[4])),
        ]
        .into_iter()
        .collect();
        assert!(state.validate(&arrays).is_err());
    }

    #[test]
    fn test_program_json_round_trip() {
        let program = Program::builder("p")
            .array("A", &[4])
            .array("B", &[4])
            .state(copy_state())
            .build()
            .unwrap();
        let json = serde_json::to_string(&program).unwrap();
        assert!(json.contains("\"kind\":\"map_entry\""));
        let parsed: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, program);
    }
}
