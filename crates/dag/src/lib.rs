mod error;

pub use crate::error::{DagError, DagResult};
use log::debug;
use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::{Display, Formatter};
use templates::{EtlStep, MigrationTemplate};

/// Edge marker; dependencies carry no data.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyEdge;
impl Display for EmptyEdge {
    fn fmt(&self, _: &mut Formatter<'_>) -> std::fmt::Result {
        Ok(())
    }
}

/// Dependency graph over the steps of one template.
///
/// Edges point from a dependency to its dependent so that a topological
/// walk yields a valid execution order. Nodes hold the step's position in
/// the template, which also breaks ties between independent steps.
#[derive(Debug)]
pub struct StepDag<'a> {
    pub graph: DiGraph<&'a EtlStep, EmptyEdge>,
    pub ref_to_index: HashMap<&'a str, NodeIndex>,
}

impl<'a> StepDag<'a> {
    pub fn build(template: &'a MigrationTemplate) -> DagResult<Self> {
        let mut dag = Self {
            graph: DiGraph::new(),
            ref_to_index: HashMap::with_capacity(template.steps.len()),
        };

        for step in &template.steps {
            if dag.ref_to_index.contains_key(step.name.as_str()) {
                return Err(DagError::duplicate_node(&step.name));
            }
            let idx = dag.graph.add_node(step);
            dag.ref_to_index.insert(step.name.as_str(), idx);
        }

        for step in &template.steps {
            let to = dag.ref_to_index[step.name.as_str()];
            for dep in &step.depends_on {
                let from = dag
                    .ref_to_index
                    .get(dep.as_str())
                    .copied()
                    .ok_or_else(|| DagError::missing_dependency(&step.name, dep))?;
                dag.graph.add_edge(from, to, EmptyEdge);
            }
        }

        if let Some(cycle) = dag.find_cycle() {
            return Err(DagError::cycle_detected(cycle));
        }
        debug!(
            "built step graph for template '{}' with {} steps",
            template.id,
            dag.graph.node_count()
        );
        Ok(dag)
    }

    fn find_cycle(&self) -> Option<Vec<String>> {
        kosaraju_scc(&self.graph)
            .into_iter()
            .find(|scc| {
                scc.len() > 1
                    || self
                        .graph
                        .find_edge(scc[0], scc[0])
                        .is_some()
            })
            .map(|mut scc| {
                scc.sort();
                scc.into_iter()
                    .map(|idx| self.graph[idx].name.clone())
                    .collect()
            })
    }

    /// Kahn's algorithm, always releasing the earliest declared ready step.
    pub fn toposort(&self) -> DagResult<Vec<NodeIndex>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for edge in self.graph.edges_directed(idx, Direction::Outgoing) {
                let next = edge.target();
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(DagError::cycle_detected(
                self.find_cycle().unwrap_or_default(),
            ));
        }
        Ok(order)
    }

    pub fn execution_order(&self) -> DagResult<Vec<&'a EtlStep>> {
        Ok(self
            .toposort()?
            .into_iter()
            .map(|idx| self.graph[idx])
            .collect())
    }

    /// Direct dependencies of `step`, in declaration order.
    pub fn dependencies(&self, step: &str) -> Vec<&'a EtlStep> {
        let Some(&idx) = self.ref_to_index.get(step) else {
            return Vec::new();
        };
        let mut deps: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        deps.sort();
        deps.into_iter().map(|d| self.graph[d]).collect()
    }

    /// DOT rendering of the step graph for `templates show --dot`.
    pub fn to_dot_string(&self) -> String {
        let mut dot = String::from("digraph {\n    rankdir=LR;\n");
        for idx in self.graph.node_indices() {
            let step = self.graph[idx];
            dot.push_str(&format!(
                "    {} [label=\"{} ({})\"];\n",
                idx.index(),
                step.name,
                step.load.object_type
            ));
        }
        for edge in self.graph.edge_references() {
            dot.push_str(&format!(
                "    {} -> {};\n",
                edge.source().index(),
                edge.target().index()
            ));
        }
        dot.push_str("}\n");
        dot
    }
}
