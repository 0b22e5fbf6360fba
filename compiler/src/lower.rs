// lower.rs — Typed lowering & verification
//
// Applies a solved `Substitution` to every declared port type, assembles the
// `TypedGraph` handed to the UI, and lowers a fully concrete typed graph to
// the provenance-free `BackendGraph`. Lowering verifies three obligations:
//
//   C1  every edge connects two identical concrete types
//   C2  every port of every node is fully concrete
//   C3  every inserted adapter has the same extent on both sides
//
// Preconditions: port types come from `constraints::extract` on the same graph.
// Postconditions: a BackendGraph is produced only when C1-C3 hold.
// Failure modes: a (payload, unit) pair that becomes invalid after
//   substitution (E0100); the substituted axis is left unresolved.
// Side effects: none.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::{AdapterKernel, BlockCatalog};
use crate::constraints::ConstraintSet;
use crate::diag::{DiagKind, Diagnostic};
use crate::graph::{DraftGraph, Provenance};
use crate::id::{EdgeId, NodeId, PortKey};
use crate::type_infer::Substitution;
use crate::types::{is_valid_pair, Axis, CanonicalType, PortType, TypeError};

// ── Output types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedNode {
    pub id: NodeId,
    pub block: String,
    #[serde(skip_serializing_if = "Provenance::is_authored")]
    pub provenance: Provenance,
    /// Resolved port types; axes that stayed unresolved remain variables.
    pub ports: BTreeMap<String, PortType>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedEdge {
    pub id: EdgeId,
    pub from: PortKey,
    pub to: PortKey,
    /// The carried type, when both endpoints agree on a concrete type.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<CanonicalType>,
}

/// The normalized graph with per-port types, as reported to the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypedGraph {
    pub nodes: BTreeMap<NodeId, TypedNode>,
    pub edges: BTreeMap<EdgeId, TypedEdge>,
}

impl TypedGraph {
    pub fn port_type(&self, key: &PortKey) -> Option<&PortType> {
        self.nodes.get(&key.node)?.ports.get(&key.port)
    }

    pub fn is_fully_concrete(&self) -> bool {
        self.nodes
            .values()
            .all(|n| n.ports.values().all(PortType::is_concrete))
    }

    /// Nodes spliced in by the normalizer, in id order.
    pub fn adapters(&self) -> impl Iterator<Item = &TypedNode> {
        self.nodes.values().filter(|n| !n.provenance.is_authored())
    }
}

/// Backend node. Carries no provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendNode {
    pub id: NodeId,
    pub block: String,
    pub ports: BTreeMap<String, CanonicalType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<AdapterKernel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendEdge {
    pub id: EdgeId,
    pub from: PortKey,
    pub to: PortKey,
    #[serde(rename = "type")]
    pub ty: CanonicalType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendGraph {
    pub nodes: Vec<BackendNode>,
    pub edges: Vec<BackendEdge>,
}

/// Machine-checkable evidence for the lowering obligations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Cert {
    /// C1: every edge connects identical concrete types.
    pub c1_edge_type_consistency: bool,
    /// C2: no unresolved axis remains.
    pub c2_fully_concrete: bool,
    /// C3: adapters preserve the extent.
    pub c3_adapter_extent_preservation: bool,
}

impl Cert {
    pub fn all_pass(&self) -> bool {
        self.c1_edge_type_consistency
            && self.c2_fully_concrete
            && self.c3_adapter_extent_preservation
    }
}

pub struct LowerResult {
    pub backend: Option<BackendGraph>,
    pub cert: Cert,
}

// ── Substitution ────────────────────────────────────────────────────────────

/// Resolve every declared port type under `subst`.
pub fn apply_substitution(
    set: &ConstraintSet,
    subst: &Substitution,
) -> (BTreeMap<PortKey, PortType>, Vec<Diagnostic>) {
    let mut resolved = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for (key, info) in &set.ports {
        let declared = &info.ty;
        let mut payload = resolve_axis(&declared.payload, key, &subst.payload);
        let mut unit = resolve_axis(&declared.unit, key, &subst.unit);
        let cardinality = match subst.card_overrides.get(key) {
            Some(c) => Axis::Inst(c.clone()),
            None => resolve_axis(&declared.cardinality, key, &subst.cardinality),
        };

        if let (Axis::Inst(p), Axis::Inst(u)) = (&payload, &unit) {
            if !is_valid_pair(*p, *u) {
                let err = TypeError::InvalidPayloadUnitPair {
                    payload: *p,
                    unit: *u,
                };
                diagnostics.push(
                    Diagnostic::new(
                        DiagKind::InvalidPayloadUnitPair,
                        format!("port '{}' resolves to an invalid type: {}", key, err),
                    )
                    .with_port(key),
                );
                // Leave the substituted axis open so the port is not concrete.
                if declared.unit.is_var() {
                    unit = declared.unit.clone();
                } else {
                    payload = declared.payload.clone();
                }
            }
        }

        resolved.insert(
            key.clone(),
            PortType {
                payload,
                unit,
                cardinality,
                temporality: declared.temporality,
            },
        );
    }
    (resolved, diagnostics)
}

fn resolve_axis<T: Clone>(
    axis: &Axis<T>,
    key: &PortKey,
    map: &BTreeMap<crate::id::VarKey, T>,
) -> Axis<T> {
    match axis {
        Axis::Inst(_) => axis.clone(),
        Axis::Var(name) => map
            .get(&crate::id::VarKey::new(&key.node, name.as_str()))
            .map(|v| Axis::Inst(v.clone()))
            .unwrap_or_else(|| axis.clone()),
    }
}

// ── Typed graph ─────────────────────────────────────────────────────────────

/// Attach resolved port types to the graph's nodes and edges.
pub fn build_typed_graph(
    graph: &DraftGraph,
    port_types: &BTreeMap<PortKey, PortType>,
) -> TypedGraph {
    let mut nodes: BTreeMap<NodeId, TypedNode> = graph
        .nodes()
        .map(|n| {
            (
                n.id.clone(),
                TypedNode {
                    id: n.id.clone(),
                    block: n.block.clone(),
                    provenance: n.provenance.clone(),
                    ports: BTreeMap::new(),
                },
            )
        })
        .collect();
    for (key, ty) in port_types {
        if let Some(node) = nodes.get_mut(&key.node) {
            node.ports.insert(key.port.clone(), ty.clone());
        }
    }

    let edges = graph
        .edges()
        .map(|e| {
            let from = port_types.get(&e.from).and_then(|t| t.to_canonical().ok());
            let to = port_types.get(&e.to).and_then(|t| t.to_canonical().ok());
            let ty = match (from, to) {
                (Some(a), Some(b)) if a == b => Some(a),
                _ => None,
            };
            (
                e.id.clone(),
                TypedEdge {
                    id: e.id.clone(),
                    from: e.from.clone(),
                    to: e.to.clone(),
                    ty,
                },
            )
        })
        .collect();

    TypedGraph { nodes, edges }
}

// ── Lowering ────────────────────────────────────────────────────────────────

/// Verify the obligations and, when they hold, erase provenance.
pub fn lower_and_verify(typed: &TypedGraph, catalog: &BlockCatalog) -> LowerResult {
    let cert = Cert {
        c1_edge_type_consistency: verify_c1_edge_types(typed),
        c2_fully_concrete: typed.is_fully_concrete(),
        c3_adapter_extent_preservation: verify_c3_adapter_extents(typed),
    };
    let backend = if cert.all_pass() {
        lower(typed, catalog)
    } else {
        None
    };
    LowerResult { backend, cert }
}

fn verify_c1_edge_types(typed: &TypedGraph) -> bool {
    typed.edges.values().all(|e| {
        e.ty.is_some()
            && typed.port_type(&e.from).is_some()
            && typed.port_type(&e.to).is_some()
    })
}

fn verify_c3_adapter_extents(typed: &TypedGraph) -> bool {
    typed.adapters().all(|node| {
        let extents: Vec<_> = node
            .ports
            .values()
            .filter_map(|t| t.to_canonical().ok())
            .map(|t| t.extent().clone())
            .collect();
        extents.windows(2).all(|w| w[0] == w[1])
    })
}

fn lower(typed: &TypedGraph, catalog: &BlockCatalog) -> Option<BackendGraph> {
    let mut nodes = Vec::with_capacity(typed.nodes.len());
    for node in typed.nodes.values() {
        let mut ports = BTreeMap::new();
        for (name, ty) in &node.ports {
            ports.insert(name.clone(), ty.to_canonical().ok()?);
        }
        let kernel = catalog
            .lookup(&node.block)
            .and_then(|def| def.adapter.as_ref())
            .map(|spec| spec.kernel);
        nodes.push(BackendNode {
            id: node.id.clone(),
            block: node.block.clone(),
            ports,
            kernel,
        });
    }
    let edges = typed
        .edges
        .values()
        .map(|e| {
            Some(BackendEdge {
                id: e.id.clone(),
                from: e.from.clone(),
                to: e.to.clone(),
                ty: e.ty.clone()?,
            })
        })
        .collect::<Option<Vec<_>>>()?;
    Some(BackendGraph { nodes, edges })
}

// ── Tests ───────────────────────────────────────────────────────────────────
