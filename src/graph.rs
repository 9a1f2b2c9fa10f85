use crate::model::{Mod, ModId, ModWarning};
use petgraph::{algo::tarjan_scc, graph::DiGraph, graph::NodeIndex};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashSet},
};
use tracing::warn;

/// Result of an ordering pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOrder {
    /// Every node, dependencies before dependents.
    pub order: Vec<ModId>,
    /// Strongly-connected units of more than one node (or a self-loop), each
    /// in its stable member order.
    pub cycles: Vec<Vec<ModId>>,
}

/// Arena of resolved mods. Node ids are indices in discovery order.
#[derive(Debug, Clone, Default)]
pub struct ModGraph {
    nodes: Vec<Mod>,
}

impl ModGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: ModId) -> Option<&Mod> {
        self.nodes.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mod> {
        self.nodes.iter()
    }

    pub fn find_by_catalog_id(&self, catalog_id: &str) -> Option<&Mod> {
        self.nodes
            .iter()
            .find(|node| node.catalog_id() == Some(catalog_id))
    }

    pub fn depends_on(&self, dependent: ModId, dependency: ModId) -> bool {
        self.get(dependent)
            .map(|node| node.dependencies.contains(&dependency))
            .unwrap_or(false)
    }

    pub fn label(&self, id: ModId) -> String {
        self.get(id)
            .map(Mod::label)
            .unwrap_or_else(|| id.to_string())
    }

    pub(crate) fn insert(&mut self, mut node: Mod) -> ModId {
        let id = ModId(self.nodes.len());
        node.id = id;
        self.nodes.push(node);
        id
    }

    /// Records `dependent -> dependency` on both ends. Returns false when the
    /// edge already existed or either id is unknown.
    pub(crate) fn link(&mut self, dependent: ModId, dependency: ModId) -> bool {
        if dependent.0 >= self.nodes.len() || dependency.0 >= self.nodes.len() {
            return false;
        }
        if self.nodes[dependent.0].dependencies.contains(&dependency) {
            return false;
        }
        self.nodes[dependent.0].dependencies.push(dependency);
        self.nodes[dependency.0].dependents.push(dependent);
        true
    }

    pub(crate) fn node_mut(&mut self, id: ModId) -> Option<&mut Mod> {
        self.nodes.get_mut(id.0)
    }

    /// Appends a warning unless the node already carries an identical one.
    pub(crate) fn warn(&mut self, id: ModId, warning: ModWarning) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            if !node.warnings.contains(&warning) {
                node.warnings.push(warning);
            }
        }
    }

    /// Strongly-connected units that form cycles, members in stable order,
    /// units ordered by their earliest discovered member.
    pub fn cycles(&self) -> Vec<Vec<ModId>> {
        let mut cycles: Vec<Vec<ModId>> = self
            .components()
            .into_iter()
            .filter(|members| self.is_cyclic_unit(members))
            .collect();
        cycles.sort_by_key(|members| members.iter().copied().min());
        cycles
    }

    /// Computes the load order without touching the nodes: dependencies
    /// first, ties broken by discovery order, cycles collapsed into one unit
    /// whose members are ordered by identity.
    pub fn load_order(&self) -> LoadOrder {
        let components = self.components();
        let mut component_of = vec![0usize; self.nodes.len()];
        for (index, members) in components.iter().enumerate() {
            for member in members {
                component_of[member.0] = index;
            }
        }

        let mut successors: Vec<HashSet<usize>> = vec![HashSet::new(); components.len()];
        let mut indegree = vec![0usize; components.len()];
        for node in &self.nodes {
            let to = component_of[node.id.0];
            for dependency in &node.dependencies {
                let from = component_of[dependency.0];
                if from != to && successors[from].insert(to) {
                    indegree[to] += 1;
                }
            }
        }

        let rank: Vec<ModId> = components
            .iter()
            .map(|members| members.iter().copied().min().unwrap_or(ModId(usize::MAX)))
            .collect();
        let mut ready: BinaryHeap<Reverse<(ModId, usize)>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| Reverse((rank[index], index)))
            .collect();

        let mut result = LoadOrder::default();
        while let Some(Reverse((_, index))) = ready.pop() {
            let members = &components[index];
            if self.is_cyclic_unit(members) {
                result.cycles.push(members.clone());
            }
            result.order.extend(members.iter().copied());
            let mut next: Vec<usize> = successors[index].iter().copied().collect();
            next.sort_unstable();
            for successor in next {
                indegree[successor] -= 1;
                if indegree[successor] == 0 {
                    ready.push(Reverse((rank[successor], successor)));
                }
            }
        }
        result
    }

    /// Runs [`ModGraph::load_order`], stores each node's position and records
    /// one circular-dependency diagnostic per cyclic unit.
    ///
    /// Positions belong to the whole graph: calling this again after more
    /// builds recomputes every position, and nothing else ever writes them.
    pub fn assign_positions(&mut self) -> LoadOrder {
        let order = self.load_order();
        for (position, id) in order.order.iter().enumerate() {
            if let Some(node) = self.node_mut(*id) {
                node.position = Some(position);
            }
        }
        for members in &order.cycles {
            let labels: Vec<String> = members.iter().map(|id| self.label(*id)).collect();
            warn!(members = %labels.join(", "), "circular dependency detected");
            let warning = ModWarning::circular(labels);
            for id in members {
                self.warn(*id, warning.clone());
            }
        }
        order
    }

    /// Tarjan components with members sorted by identity key.
    fn components(&self) -> Vec<Vec<ModId>> {
        let mut graph: DiGraph<ModId, ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        for node in &self.nodes {
            graph.add_node(node.id);
        }
        for node in &self.nodes {
            for dependency in &node.dependencies {
                graph.add_edge(NodeIndex::new(dependency.0), NodeIndex::new(node.id.0), ());
            }
        }

        tarjan_scc(&graph)
            .into_iter()
            .map(|component| {
                let mut members: Vec<ModId> =
                    component.into_iter().map(|index| graph[index]).collect();
                members.sort_by(|a, b| {
                    self.nodes[a.0]
                        .identity_key()
                        .cmp(&self.nodes[b.0].identity_key())
                        .then(a.cmp(b))
                });
                members
            })
            .collect()
    }

    fn is_cyclic_unit(&self, members: &[ModId]) -> bool {
        match members {
            [single] => self.depends_on(*single, *single),
            _ => members.len() > 1,
        }
    }
}
