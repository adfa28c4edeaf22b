use super::attributes::AttributeTable;
use super::error::{ModelError, describe};
use super::keys::intern_graph;
use super::models::ids::{EdgeIndex, ParticleIndex};
use super::models::store::ParticleStore;
use slotmap::{SecondaryMap, SlotMap};
use smallvec::SmallVec;
use std::fmt;
use tracing::trace;

/// The interned identity of one graph stored over the particles of a store.
///
/// Several independent graphs (bonds, user graphs) can coexist; each is
/// addressed by its own `GraphData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphData {
    index: u32,
    name: &'static str,
}

impl GraphData {
    /// Interns `name`, returning the same graph for the same name.
    pub fn new(name: &str) -> Self {
        let (index, name) = intern_graph(name);
        Self { index, name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for GraphData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Edge {
    nodes: [ParticleIndex; 2],
    attributes: AttributeTable,
}

type EdgeList = SmallVec<[EdgeIndex; 4]>;

/// Edge arena plus per-node adjacency for one graph.
#[derive(Debug, Clone, Default)]
pub(crate) struct GraphStorage {
    edges: SlotMap<EdgeIndex, Edge>,
    adjacency: SecondaryMap<ParticleIndex, EdgeList>,
}

impl GraphStorage {
    fn remove_slot(&mut self, node: ParticleIndex, edge: EdgeIndex) -> bool {
        match self.adjacency.get_mut(node) {
            Some(list) => match list.iter().position(|e| *e == edge) {
                Some(position) => {
                    // `remove` keeps the remaining slots contiguous and in order.
                    list.remove(position);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Drops `node` and every edge incident to it; returns the number of edges removed.
    pub(crate) fn detach(&mut self, node: ParticleIndex) -> usize {
        let Some(list) = self.adjacency.remove(node) else {
            return 0;
        };
        for edge in &list {
            if let Some(removed) = self.edges.remove(*edge) {
                let other = if removed.nodes[0] == node { removed.nodes[1] } else { removed.nodes[0] };
                self.remove_slot(other, *edge);
            }
        }
        list.len()
    }
}

impl ParticleStore {
    fn graph(&self, graph: GraphData) -> Option<&GraphStorage> {
        self.graphs.get(graph.index())
    }

    fn graph_mut(&mut self, graph: GraphData) -> &mut GraphStorage {
        if graph.index() >= self.graphs.len() {
            self.graphs.resize_with(graph.index() + 1, GraphStorage::default);
        }
        &mut self.graphs[graph.index()]
    }

    fn describe_particle(&self, index: ParticleIndex) -> String {
        match self.particle(index) {
            Ok(particle) => describe(particle.name(), index),
            Err(_) => format!("{:?}", index),
        }
    }

    fn adjacency(&self, graph: GraphData, node: ParticleIndex) -> Result<&EdgeList, ModelError> {
        self.particle(node)?;
        self.graph(graph)
            .and_then(|storage| storage.adjacency.get(node))
            .ok_or_else(|| ModelError::NotGraphNode {
                particle: self.describe_particle(node),
                graph: graph.name(),
            })
    }

    fn edge(&self, graph: GraphData, edge: EdgeIndex) -> Result<&Edge, ModelError> {
        self.graph(graph)
            .and_then(|storage| storage.edges.get(edge))
            .ok_or(ModelError::EdgeNotFound {
                edge,
                graph: graph.name(),
            })
    }

    /// Registers `node` as a vertex of `graph` with no edges.
    pub fn graph_initialize_node(&mut self, graph: GraphData, node: ParticleIndex) -> Result<(), ModelError> {
        self.particle(node)?;
        if self.graph_is_node(graph, node) {
            return Err(ModelError::AlreadyGraphNode {
                particle: self.describe_particle(node),
                graph: graph.name(),
            });
        }
        self.graph_mut(graph).adjacency.insert(node, EdgeList::new());
        Ok(())
    }

    /// Returns `true` if `node` has been set up as a node of `graph`.
    pub fn graph_is_node(&self, graph: GraphData, node: ParticleIndex) -> bool {
        self.graph(graph)
            .is_some_and(|storage| storage.adjacency.contains_key(node))
    }

    /// Connects two distinct nodes with a new edge and appends it to both
    /// endpoints' edge lists.
    ///
    /// All preconditions are checked before anything is modified, so on error the
    /// graph is exactly as it was.
    ///
    /// # Errors
    ///
    /// - [`ModelError::InvalidValue`] if `a == b` or the pair is already connected.
    /// - [`ModelError::NotGraphNode`] if either particle is not a node of `graph`.
    /// - [`ModelError::ParticleNotFound`] if either index is stale.
    pub fn graph_connect(&mut self, graph: GraphData, a: ParticleIndex, b: ParticleIndex) -> Result<EdgeIndex, ModelError> {
        if a == b {
            return Err(ModelError::invalid(
                "graph_connect",
                format!("cannot connect particle {} to itself", self.describe_particle(a)),
            ));
        }
        self.adjacency(graph, a)?;
        self.adjacency(graph, b)?;
        if self.graph_get_edge_between(graph, a, b).is_some() {
            return Err(ModelError::invalid(
                "graph_connect",
                format!(
                    "particles {} and {} are already connected in graph '{}'",
                    self.describe_particle(a),
                    self.describe_particle(b),
                    graph
                ),
            ));
        }

        let storage = self.graph_mut(graph);
        let edge = storage.edges.insert(Edge {
            nodes: [a, b],
            attributes: AttributeTable::new(),
        });
        for node in [a, b] {
            if let Some(list) = storage.adjacency.get_mut(node) {
                list.push(edge);
            }
        }
        trace!(graph = graph.name(), ?edge, "Connected {:?} and {:?}", a, b);
        Ok(edge)
    }

    /// Removes an edge and compacts both endpoints' edge lists.
    pub fn graph_disconnect(&mut self, graph: GraphData, edge: EdgeIndex) -> Result<(), ModelError> {
        let nodes = self.edge(graph, edge)?.nodes;
        let storage = self.graph_mut(graph);
        storage.edges.remove(edge);
        for node in nodes {
            if !storage.remove_slot(node, edge) {
                return Err(ModelError::Internal(format!(
                    "edge {:?} of graph '{}' missing from the edge list of {:?}",
                    edge, graph, node
                )));
            }
        }
        trace!(graph = graph.name(), ?edge, "Disconnected");
        Ok(())
    }

    /// Number of edges incident to `node`.
    pub fn graph_get_number_of_edges(&self, graph: GraphData, node: ParticleIndex) -> Result<usize, ModelError> {
        Ok(self.adjacency(graph, node)?.len())
    }

    /// The `slot`-th edge of `node`; slots `0..count` are always valid.
    pub fn graph_get_edge(&self, graph: GraphData, node: ParticleIndex, slot: usize) -> Result<EdgeIndex, ModelError> {
        let list = self.adjacency(graph, node)?;
        list.get(slot)
            .copied()
            .ok_or_else(|| ModelError::EdgeSlotOutOfRange {
                particle: self.describe_particle(node),
                graph: graph.name(),
                slot,
                count: list.len(),
            })
    }

    /// The node at the other end of `node`'s `slot`-th edge.
    pub fn graph_get_neighbor(&self, graph: GraphData, node: ParticleIndex, slot: usize) -> Result<ParticleIndex, ModelError> {
        let edge = self.graph_get_edge(graph, node, slot)?;
        let [first, second] = self.edge(graph, edge)?.nodes;
        match (first == node, second == node) {
            (true, false) => Ok(second),
            (false, true) => Ok(first),
            _ => Err(ModelError::Internal(format!(
                "edge {:?} listed on {:?} does not have it as exactly one endpoint",
                edge, node
            ))),
        }
    }

    /// Endpoint `endpoint` (0 or 1) of `edge`.
    pub fn graph_get_node(&self, graph: GraphData, edge: EdgeIndex, endpoint: usize) -> Result<ParticleIndex, ModelError> {
        let nodes = self.edge(graph, edge)?.nodes;
        nodes
            .get(endpoint)
            .copied()
            .ok_or(ModelError::EndpointOutOfRange { endpoint })
    }

    /// The edge joining `a` and `b` in either direction, if any.
    pub fn graph_get_edge_between(&self, graph: GraphData, a: ParticleIndex, b: ParticleIndex) -> Option<EdgeIndex> {
        let storage = self.graph(graph)?;
        storage.adjacency.get(a)?.iter().copied().find(|edge| {
            storage
                .edges
                .get(*edge)
                .is_some_and(|e| e.nodes == [a, b] || e.nodes == [b, a])
        })
    }

    /// The particles sharing an edge with `node`, in edge insertion order.
    ///
    /// # Errors
    ///
    /// Returns `NotGraphNode` if `node` is not part of `graph`.
    pub fn graph_neighbors(&self, graph: GraphData, node: ParticleIndex) -> Result<Vec<ParticleIndex>, ModelError> {
        let count = self.graph_get_number_of_edges(graph, node)?;
        (0..count).map(|slot| self.graph_get_neighbor(graph, node, slot)).collect()
    }

    /// Every edge of `graph` with its endpoints, in arena order.
    pub fn graph_edges(&self, graph: GraphData) -> impl Iterator<Item = (EdgeIndex, [ParticleIndex; 2])> + '_ {
        self.graph(graph)
            .into_iter()
            .flat_map(|storage| storage.edges.iter().map(|(index, edge)| (index, edge.nodes)))
    }

    /// Attributes stored on `edge`.
    pub fn graph_edge_attributes(&self, graph: GraphData, edge: EdgeIndex) -> Result<&AttributeTable, ModelError> {
        Ok(&self.edge(graph, edge)?.attributes)
    }

    pub fn graph_edge_attributes_mut(&mut self, graph: GraphData, edge: EdgeIndex) -> Result<&mut AttributeTable, ModelError> {
        self.graph_mut(graph)
            .edges
            .get_mut(edge)
            .map(|e| &mut e.attributes)
            .ok_or(ModelError::EdgeNotFound {
                edge,
                graph: graph.name(),
            })
    }
}
