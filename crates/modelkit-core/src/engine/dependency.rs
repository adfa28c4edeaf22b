use super::error::EngineError;
use super::ids::ScoreStateId;
use crate::core::models::ids::ParticleIndex;
use itertools::Itertools;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::fmt::Write;
use tracing::debug;

/// What the graph needs to know about one score state.
#[derive(Debug, Clone)]
pub(crate) struct StateInfo {
    pub id: ScoreStateId,
    pub name: String,
    pub inputs: Vec<ParticleIndex>,
    pub outputs: Vec<ParticleIndex>,
}

#[derive(Debug, Clone)]
struct Node {
    id: ScoreStateId,
    name: String,
    inputs: HashSet<ParticleIndex>,
    outputs: HashSet<ParticleIndex>,
}

/// Ordering constraints between score states.
///
/// State `a` precedes state `b` when a particle written by `a` is read by `b`.
/// The evaluation order is a topological order of these constraints; states
/// that are not constrained relative to each other keep their insertion order.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<Node>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Builds the graph from states listed in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DependencyCycle`] naming the states on one cycle.
    pub(crate) fn build(states: Vec<StateInfo>) -> Result<Self, EngineError> {
        let nodes: Vec<Node> = states
            .into_iter()
            .map(|info| Node {
                id: info.id,
                name: info.name,
                inputs: info.inputs.into_iter().collect(),
                outputs: info.outputs.into_iter().collect(),
            })
            .collect();

        let n = nodes.len();
        let mut successors = vec![Vec::new(); n];
        let mut predecessors = vec![Vec::new(); n];
        for (from, to) in (0..n).cartesian_product(0..n) {
            if from != to && !nodes[from].outputs.is_disjoint(&nodes[to].inputs) {
                successors[from].push(to);
                predecessors[to].push(from);
            }
        }

        let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n).filter(|i| in_degree[*i] == 0).map(Reverse).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(next)) = ready.pop() {
            order.push(next);
            for succ in &successors[next] {
                in_degree[*succ] -= 1;
                if in_degree[*succ] == 0 {
                    ready.push(Reverse(*succ));
                }
            }
        }

        let graph = Self {
            nodes,
            successors,
            predecessors,
            order,
        };
        if graph.order.len() < n {
            return Err(EngineError::DependencyCycle {
                states: graph.find_cycle(&in_degree),
            });
        }
        debug!(
            states = n,
            edges = graph.successors.iter().map(Vec::len).sum::<usize>(),
            "Score state dependencies computed."
        );
        Ok(graph)
    }

    /// Every node left with a non-zero in-degree after Kahn's pass has a
    /// predecessor that was also left over, so walking predecessors must close
    /// a loop.
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<String> {
        let Some(start) = (0..self.nodes.len()).find(|i| in_degree[*i] > 0) else {
            return Vec::new();
        };
        let mut seen = vec![None; self.nodes.len()];
        let mut path = Vec::new();
        let mut current = start;
        loop {
            if let Some(position) = seen[current] {
                let mut cycle: Vec<usize> = path[position..].to_vec();
                cycle.reverse();
                cycle.push(cycle[0]);
                return cycle.into_iter().map(|i| self.nodes[i].name.clone()).collect();
            }
            seen[current] = Some(path.len());
            path.push(current);
            match self.predecessors[current].iter().find(|p| in_degree[**p] > 0) {
                Some(previous) => current = *previous,
                None => return vec![self.nodes[current].name.clone()],
            }
        }
    }

    /// Number of score states in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Score states in before-evaluate order.
    pub fn order(&self) -> impl DoubleEndedIterator<Item = ScoreStateId> + '_ {
        self.order.iter().map(|i| self.nodes[*i].id)
    }

    fn node_of(&self, id: ScoreStateId) -> Option<usize> {
        self.nodes.iter().position(|node| node.id == id)
    }

    /// States that must run before `id`.
    pub fn dependencies(&self, id: ScoreStateId) -> Vec<ScoreStateId> {
        self.node_of(id)
            .map(|i| self.predecessors[i].iter().map(|p| self.nodes[*p].id).collect())
            .unwrap_or_default()
    }

    /// States that must run after `id`.
    pub fn dependents(&self, id: ScoreStateId) -> Vec<ScoreStateId> {
        self.node_of(id)
            .map(|i| self.successors[i].iter().map(|s| self.nodes[*s].id).collect())
            .unwrap_or_default()
    }

    /// Every state that, directly or transitively, writes one of `inputs`,
    /// returned in evaluation order.
    pub fn upstream_of(&self, inputs: &[ParticleIndex]) -> Vec<ScoreStateId> {
        let mut needed = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| inputs.iter().any(|p| node.outputs.contains(p)))
            .map(|(i, _)| i)
            .collect();
        while let Some(i) = stack.pop() {
            if needed[i] {
                continue;
            }
            needed[i] = true;
            stack.extend(self.predecessors[i].iter().filter(|p| !needed[**p]));
        }
        self.order
            .iter()
            .filter(|i| needed[**i])
            .map(|i| self.nodes[*i].id)
            .collect()
    }

    /// Renders the graph in graphviz `dot` syntax.
    pub fn to_graphviz(&self) -> String {
        let mut out = String::from("digraph dependencies {\n");
        for (i, node) in self.nodes.iter().enumerate() {
            let _ = writeln!(out, "  n{} [label=\"{}\"];", i, node.name.replace('"', "\\\""));
        }
        for (from, targets) in self.successors.iter().enumerate() {
            for to in targets {
                let _ = writeln!(out, "  n{} -> n{};", from, to);
            }
        }
        out.push_str("}\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    struct Fixture {
        ids: SlotMap<ScoreStateId, ()>,
        particles: SlotMap<ParticleIndex, ()>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                ids: SlotMap::with_key(),
                particles: SlotMap::with_key(),
            }
        }

        fn particle(&mut self) -> ParticleIndex {
            self.particles.insert(())
        }

        fn state(&mut self, name: &str, inputs: &[ParticleIndex], outputs: &[ParticleIndex]) -> StateInfo {
            StateInfo {
                id: self.ids.insert(()),
                name: name.to_string(),
                inputs: inputs.to_vec(),
                outputs: outputs.to_vec(),
            }
        }
    }

    #[test]
    fn independent_states_keep_insertion_order() {
        let mut f = Fixture::new();
        let p = f.particle();
        let states = vec![f.state("a", &[p], &[]), f.state("b", &[p], &[]), f.state("c", &[], &[])];
        let ids: Vec<_> = states.iter().map(|s| s.id).collect();
        let graph = DependencyGraph::build(states).unwrap();
        assert_eq!(graph.order().collect::<Vec<_>>(), ids);
    }

    #[test]
    fn writer_runs_before_reader_regardless_of_insertion() {
        let mut f = Fixture::new();
        let (p, q) = (f.particle(), f.particle());
        let reader = f.state("reader", &[q], &[]);
        let writer = f.state("writer", &[p], &[q]);
        let (reader_id, writer_id) = (reader.id, writer.id);
        let graph = DependencyGraph::build(vec![reader, writer]).unwrap();
        assert_eq!(graph.order().collect::<Vec<_>>(), vec![writer_id, reader_id]);
        assert_eq!(graph.dependencies(reader_id), vec![writer_id]);
        assert_eq!(graph.dependents(writer_id), vec![reader_id]);
    }

    #[test]
    fn a_state_reading_its_own_output_is_not_a_cycle() {
        let mut f = Fixture::new();
        let p = f.particle();
        let graph = DependencyGraph::build(vec![f.state("self", &[p], &[p])]).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn cycle_is_reported_with_state_names() {
        let mut f = Fixture::new();
        let (p, q) = (f.particle(), f.particle());
        let first = f.state("first", &[p], &[q]);
        let second = f.state("second", &[q], &[p]);
        let unrelated = f.state("unrelated", &[], &[]);
        match DependencyGraph::build(vec![unrelated, first, second]) {
            Err(EngineError::DependencyCycle { states }) => {
                assert_eq!(states.len(), 3);
                assert_eq!(states.first(), states.last());
                assert!(states.contains(&"first".to_string()));
                assert!(states.contains(&"second".to_string()));
            }
            other => panic!("expected a dependency cycle, got {other:?}"),
        }
    }

    #[test]
    fn upstream_closure_is_transitive_and_ordered() {
        let mut f = Fixture::new();
        let (a, b, c, d) = (f.particle(), f.particle(), f.particle(), f.particle());
        let second = f.state("second", &[b], &[c]);
        let first = f.state("first", &[a], &[b]);
        let unrelated = f.state("unrelated", &[a], &[d]);
        let (first_id, second_id) = (first.id, second.id);
        let graph = DependencyGraph::build(vec![second, first, unrelated]).unwrap();
        assert_eq!(graph.upstream_of(&[c]), vec![first_id, second_id]);
        assert!(graph.upstream_of(&[a]).is_empty());
    }

    #[test]
    fn graphviz_lists_nodes_and_edges() {
        let mut f = Fixture::new();
        let p = f.particle();
        let graph = DependencyGraph::build(vec![f.state("w", &[], &[p]), f.state("r", &[p], &[])]).unwrap();
        let dot = graph.to_graphviz();
        assert!(dot.starts_with("digraph dependencies {"));
        assert!(dot.contains("n0 [label=\"w\"];"));
        assert!(dot.contains("n0 -> n1;"));
    }
}
