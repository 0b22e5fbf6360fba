// graph.rs — Draft dataflow graph and cycle classification
//
// The draft graph is the authored patch: block instances keyed by stable node
// id and edges keyed by stable edge id, each edge connecting an output port to
// an input port by name. Passes treat a graph as an immutable value; rewrites
// (adapter insertion) produce a new graph.
//
// Also computes strongly connected components and classifies each nontrivial
// one as legal feedback (every cycle is broken by a block reading
// previous-frame state) or an illegal instantaneous loop.
//
// Preconditions: none for construction; cycle classification needs the catalog
//   to know which blocks read previous-frame state.
// Postconditions: node and edge ids are unique; iteration is in id order.
// Failure modes: duplicate ids and malformed port references → `GraphError`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::BlockCatalog;
use crate::id::{sha256_hex, EdgeId, NodeId, PortKey};
use crate::types::PortType;

// ── Public types ────────────────────────────────────────────────────────────

/// Where a node came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    #[default]
    Authored,
    /// Spliced in by the normalizer to convert across `replaced_edge`.
    Inserted { rule: String, replaced_edge: EdgeId },
}

impl Provenance {
    pub fn is_authored(&self) -> bool {
        matches!(self, Provenance::Authored)
    }
}

/// A block instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Block type name, looked up in the catalog.
    pub block: String,
    /// Per-instance port type overrides, replacing the catalog base type.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_types: BTreeMap<String, PortType>,
    #[serde(default, skip_serializing_if = "Provenance::is_authored")]
    pub provenance: Provenance,
}

impl Node {
    pub fn new(id: impl Into<String>, block: impl Into<String>) -> Self {
        Node {
            id: NodeId::new(id),
            block: block.into(),
            port_types: BTreeMap::new(),
            provenance: Provenance::Authored,
        }
    }
}

/// A directed edge from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub from: PortKey,
    pub to: PortKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(NodeId),
    #[error("duplicate edge id '{0}'")]
    DuplicateEdge(EdgeId),
    #[error("malformed port reference: {0}")]
    MalformedPortRef(String),
}

/// The authored (or partially normalized) graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "GraphFile", into = "GraphFile")]
pub struct DraftGraph {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Edge>,
}

/// Serialized layout: plain lists, id-ordered on output.
#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl TryFrom<GraphFile> for DraftGraph {
    type Error = GraphError;

    fn try_from(file: GraphFile) -> Result<Self, Self::Error> {
        let mut graph = DraftGraph::new();
        for node in file.nodes {
            graph.add_node(node)?;
        }
        for edge in file.edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }
}

impl From<DraftGraph> for GraphFile {
    fn from(graph: DraftGraph) -> Self {
        GraphFile {
            nodes: graph.nodes.into_values().collect(),
            edges: graph.edges.into_values().collect(),
        }
    }
}

impl DraftGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Add an edge. Endpoints are not checked here; dangling edges are
    /// reported by constraint extraction.
    pub fn add_edge(&mut self, edge: Edge) -> Result<(), GraphError> {
        if self.edges.contains_key(&edge.id) {
            return Err(GraphError::DuplicateEdge(edge.id));
        }
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    pub fn remove_edge(&mut self, id: &EdgeId) -> Option<Edge> {
        self.edges.remove(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Edges in id order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of nodes the normalizer spliced in.
    pub fn inserted_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| !n.provenance.is_authored())
            .count()
    }

    /// Compact JSON in id order.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(&GraphFile::from(self.clone())).unwrap_or_default()
    }

    /// SHA-256 of `canonical_json()`.
    pub fn fingerprint(&self) -> String {
        sha256_hex(self.canonical_json().as_bytes())
    }

    /// Node-level successor lists, restricted to edges whose endpoints exist.
    fn successors(&self, keep: impl Fn(&Edge) -> bool) -> BTreeMap<NodeId, BTreeSet<NodeId>> {
        let mut succ: BTreeMap<NodeId, BTreeSet<NodeId>> = self
            .nodes
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for edge in self.edges.values() {
            if !self.nodes.contains_key(&edge.to.node) || !keep(edge) {
                continue;
            }
            if let Some(out) = succ.get_mut(&edge.from.node) {
                out.insert(edge.to.node.clone());
            }
        }
        succ
    }
}

impl fmt::Display for DraftGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "DraftGraph ({} nodes, {} edges)",
            self.nodes.len(),
            self.edges.len()
        )?;
        for node in self.nodes.values() {
            writeln!(f, "  node {}: {}", node.id, node.block)?;
        }
        for edge in self.edges.values() {
            writeln!(f, "  edge {}: {} -> {}", edge.id, edge.from, edge.to)?;
        }
        Ok(())
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Chained construction for hand-written graphs; the first error wins.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: DraftGraph,
    error: Option<GraphError>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, id: &str, block: &str) -> Self {
        self.record(|g| g.add_node(Node::new(id, block)));
        self
    }

    /// Override one port type on an already-added node.
    pub fn override_port(mut self, node: &str, port: &str, ty: PortType) -> Self {
        if let Some(n) = self.graph.nodes.get_mut(&NodeId::new(node)) {
            n.port_types.insert(port.to_string(), ty);
        }
        self
    }

    /// Add an edge between `node.port` references.
    pub fn edge(mut self, id: &str, from: &str, to: &str) -> Self {
        self.record(|g| {
            let from = PortKey::try_from(from.to_string()).map_err(GraphError::MalformedPortRef)?;
            let to = PortKey::try_from(to.to_string()).map_err(GraphError::MalformedPortRef)?;
            g.add_edge(Edge {
                id: EdgeId::new(id),
                from,
                to,
            })
        });
        self
    }

    pub fn build(self) -> Result<DraftGraph, GraphError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.graph),
        }
    }

    fn record(&mut self, op: impl FnOnce(&mut DraftGraph) -> Result<(), GraphError>) {
        if self.error.is_none() {
            if let Err(err) = op(&mut self.graph) {
                self.error = Some(err);
            }
        }
    }
}

// ── Cycle classification ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleClass {
    /// Every cycle passes through a previous-frame read.
    LegalFeedback,
    /// Some cycle is evaluated within a single frame.
    IllegalInstantaneous,
}

/// One nontrivial strongly connected component of the final graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Member nodes in id order.
    pub nodes: Vec<NodeId>,
    pub class: CycleClass,
}

/// Find and classify every nontrivial SCC, ordered by smallest member id.
pub fn classify_cycles(graph: &DraftGraph, catalog: &BlockCatalog) -> Vec<CycleReport> {
    let reads_previous = |id: &NodeId| {
        graph
            .node(id)
            .and_then(|n| catalog.lookup(&n.block))
            .is_some_and(|def| def.reads_previous_frame)
    };

    let full = graph.successors(|_| true);
    // Cutting every edge into a delaying block leaves exactly the
    // instantaneous dependencies.
    let instantaneous = graph.successors(|e| !reads_previous(&e.to.node));

    let mut reports: Vec<CycleReport> = nontrivial_components(&full)
        .into_iter()
        .map(|nodes| {
            let members: BTreeSet<&NodeId> = nodes.iter().collect();
            let restricted: BTreeMap<NodeId, BTreeSet<NodeId>> = instantaneous
                .iter()
                .filter(|(id, _)| members.contains(id))
                .map(|(id, out)| {
                    let kept = out.iter().filter(|t| members.contains(t)).cloned().collect();
                    (id.clone(), kept)
                })
                .collect();
            let class = if nontrivial_components(&restricted).is_empty() {
                CycleClass::LegalFeedback
            } else {
                CycleClass::IllegalInstantaneous
            };
            CycleReport { nodes, class }
        })
        .collect();
    reports.sort_by(|a, b| a.nodes.cmp(&b.nodes));
    reports
}

/// SCCs with more than one node, or a single node with a self-loop.
fn nontrivial_components(succ: &BTreeMap<NodeId, BTreeSet<NodeId>>) -> Vec<Vec<NodeId>> {
    strongly_connected_components(succ)
        .into_iter()
        .filter(|scc| {
            scc.len() > 1 || succ.get(&scc[0]).is_some_and(|out| out.contains(&scc[0]))
        })
        .collect()
}

/// Tarjan's algorithm. Each component is returned sorted.
pub fn strongly_connected_components(
    succ: &BTreeMap<NodeId, BTreeSet<NodeId>>,
) -> Vec<Vec<NodeId>> {
    let mut state = Tarjan {
        succ,
        index: BTreeMap::new(),
        lowlink: BTreeMap::new(),
        on_stack: BTreeSet::new(),
        stack: Vec::new(),
        next_index: 0,
        components: Vec::new(),
    };
    for id in succ.keys() {
        if !state.index.contains_key(id) {
            state.visit(id);
        }
    }
    state.components
}

struct Tarjan<'a> {
    succ: &'a BTreeMap<NodeId, BTreeSet<NodeId>>,
    index: BTreeMap<&'a NodeId, usize>,
    lowlink: BTreeMap<&'a NodeId, usize>,
    on_stack: BTreeSet<&'a NodeId>,
    stack: Vec<&'a NodeId>,
    next_index: usize,
    components: Vec<Vec<NodeId>>,
}

impl<'a> Tarjan<'a> {
    fn visit(&mut self, v: &'a NodeId) {
        self.index.insert(v, self.next_index);
        self.lowlink.insert(v, self.next_index);
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack.insert(v);

        let succ = self.succ;
        for w in succ.get(v).into_iter().flatten() {
            if !self.index.contains_key(w) {
                self.visit(w);
                let low = self.lowlink[v].min(self.lowlink[w]);
                self.lowlink.insert(v, low);
            } else if self.on_stack.contains(w) {
                let low = self.lowlink[v].min(self.index[w]);
                self.lowlink.insert(v, low);
            }
        }

        if self.lowlink[v] == self.index[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack.remove(w);
                component.push(w.clone());
                if w == v {
                    break;
                }
            }
            component.sort();
            self.components.push(component);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
