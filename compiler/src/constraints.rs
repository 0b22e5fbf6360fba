// constraints.rs — Constraint extraction
//
// Walks a draft graph against the block catalog and emits the equations the
// solvers consume: payload and unit equalities (only where a variable is
// involved, since concrete mismatches are adapter obligations), cardinality
// equalities and fixed values, zip-broadcast groups, and the edge pairs the
// adapter pass later inspects.
//
// Preconditions: none; the graph may be malformed.
// Postconditions: every port of every known node appears in `ports`; every
//   emitted constraint names only ports present in `ports`.
// Failure modes: unknown block type (E0400), edge to a missing node or port
//   (E0401), two edges into one input (E0402), override of a port the block
//   does not declare (W0100). The offending element is skipped.
// Side effects: none.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::{AxisKind, BlockCatalog, ConstraintTemplate, PortDir};
use crate::diag::{DiagKind, Diagnostic};
use crate::graph::DraftGraph;
use crate::id::{EdgeId, NodeId, PortKey, VarKey};
use crate::types::{Axis, Cardinality, PayloadType, PortType, Unit};

// ── Output types ────────────────────────────────────────────────────────────

/// Why two ports are related.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Origin {
    /// A block template (shared variable or explicit `equal`).
    Template(NodeId),
    Edge(EdgeId),
}

/// One side of a payload/unit equation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Term<T> {
    Var(VarKey),
    Const(T),
}

/// Payload or unit constraint. Ports are carried for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AxisConstraint<T> {
    Equal {
        a: PortKey,
        b: PortKey,
        lhs: VarKey,
        rhs: VarKey,
        origin: Origin,
    },
    Fixed {
        port: PortKey,
        var: VarKey,
        value: T,
        /// The concrete port the value came from.
        source: PortKey,
        origin: Origin,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZipRole {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZipMember {
    pub port: PortKey,
    pub role: ZipRole,
}

/// Cardinality constraint. Every port is its own solver slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CardConstraint {
    Equal {
        a: PortKey,
        b: PortKey,
        origin: Origin,
    },
    Fixed {
        port: PortKey,
        value: Cardinality,
    },
    ZipBroadcast {
        group: NodeId,
        members: Vec<ZipMember>,
    },
}

/// An edge whose endpoints both resolved to declared ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgePair {
    pub edge: EdgeId,
    pub from: PortKey,
    pub to: PortKey,
}

/// Declared (base or overridden) type of a port.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortInfo {
    pub ty: PortType,
    pub dir: PortDir,
    pub zip_member: bool,
    /// Cardinality pinned by a `fixed` template rather than declared.
    pub pinned: bool,
}

/// Everything the solvers and the adapter pass need from one graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConstraintSet {
    pub payload: Vec<AxisConstraint<PayloadType>>,
    pub unit: Vec<AxisConstraint<Unit>>,
    pub cardinality: Vec<CardConstraint>,
    pub edge_pairs: Vec<EdgePair>,
    pub ports: BTreeMap<PortKey, PortInfo>,
}

pub struct ExtractResult {
    pub constraints: ConstraintSet,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Extract constraints from `graph`. Pure.
pub fn extract(graph: &DraftGraph, catalog: &BlockCatalog) -> ExtractResult {
    let mut ex = Extractor {
        set: ConstraintSet::default(),
        diagnostics: Vec::new(),
    };
    for node in graph.nodes() {
        ex.extract_node(node, catalog);
    }
    ex.extract_edges(graph);
    ExtractResult {
        constraints: ex.set,
        diagnostics: ex.diagnostics,
    }
}

// ── Extraction engine ───────────────────────────────────────────────────────

struct Extractor {
    set: ConstraintSet,
    diagnostics: Vec<Diagnostic>,
}

impl Extractor {
    fn extract_node(&mut self, node: &crate::graph::Node, catalog: &BlockCatalog) {
        let Some(def) = catalog.lookup(&node.block) else {
            self.diagnostics.push(
                Diagnostic::new(
                    DiagKind::UnknownBlockType,
                    format!("node '{}' uses unknown block type '{}'", node.id, node.block),
                )
                .with_node(&node.id)
                .with_hint("load a catalog that defines this block with --catalog"),
            );
            return;
        };

        for port in node.port_types.keys() {
            if def.port(port).is_none() {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagKind::UnknownPortOverride,
                        format!(
                            "node '{}' overrides port '{}', which block '{}' does not declare",
                            node.id, port, def.name
                        ),
                    )
                    .with_node(&node.id),
                );
            }
        }

        let zip_members = def.zip_members();
        // Ports sharing a variable name on one axis: first port seen per var.
        let mut card_vars: BTreeMap<String, PortKey> = BTreeMap::new();

        for (dir, port) in def.ports() {
            let key = PortKey::new(node.id.as_str(), port.name.as_str());
            let overridden = node.port_types.get(&port.name);
            let pinned = overridden.is_none() && def.pins_cardinality(&port.name);
            let ty = overridden.cloned().unwrap_or_else(|| def.base_type(port));

            match &ty.cardinality {
                Axis::Inst(value) => self.set.cardinality.push(CardConstraint::Fixed {
                    port: key.clone(),
                    value: value.clone(),
                }),
                Axis::Var(name) => match card_vars.get(name) {
                    Some(first) => self.set.cardinality.push(CardConstraint::Equal {
                        a: first.clone(),
                        b: key.clone(),
                        origin: Origin::Template(node.id.clone()),
                    }),
                    None => {
                        card_vars.insert(name.clone(), key.clone());
                    }
                },
            }

            self.set.ports.insert(
                key,
                PortInfo {
                    ty,
                    dir,
                    zip_member: zip_members.contains(port.name.as_str()),
                    pinned,
                },
            );
        }

        for template in &def.constraints {
            match template {
                ConstraintTemplate::Equal { axis, ports } => {
                    self.extract_template_equal(&node.id, *axis, ports);
                }
                ConstraintTemplate::ZipBroadcast { ports } => {
                    let members = ports
                        .iter()
                        .filter_map(|p| {
                            let key = PortKey::new(node.id.as_str(), p.as_str());
                            let info = self.set.ports.get(&key)?;
                            let role = match info.dir {
                                PortDir::Input => ZipRole::Input,
                                PortDir::Output => ZipRole::Output,
                            };
                            Some(ZipMember { port: key, role })
                        })
                        .collect();
                    self.set.cardinality.push(CardConstraint::ZipBroadcast {
                        group: node.id.clone(),
                        members,
                    });
                }
                // Already folded into the port's base type.
                ConstraintTemplate::Fixed { .. } => {}
            }
        }
    }

    /// Explicit template equality relates consecutive listed ports.
    fn extract_template_equal(&mut self, node: &NodeId, axis: AxisKind, ports: &[String]) {
        let origin = Origin::Template(node.clone());
        let keys: Vec<PortKey> = ports
            .iter()
            .map(|p| PortKey::new(node.as_str(), p.as_str()))
            .collect();
        for pair in keys.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            match axis {
                AxisKind::Payload => self.relate_payload(a, b, origin.clone()),
                AxisKind::Unit => self.relate_unit(a, b, origin.clone()),
                AxisKind::Cardinality => self.set.cardinality.push(CardConstraint::Equal {
                    a: a.clone(),
                    b: b.clone(),
                    origin: origin.clone(),
                }),
            }
        }
    }

    fn extract_edges(&mut self, graph: &DraftGraph) {
        let mut drivers: BTreeMap<PortKey, EdgeId> = BTreeMap::new();

        for edge in graph.edges() {
            let from_ok = self.check_endpoint(edge, &edge.from, PortDir::Output, graph);
            let to_ok = self.check_endpoint(edge, &edge.to, PortDir::Input, graph);
            if !(from_ok && to_ok) {
                continue;
            }

            if let Some(first) = drivers.get(&edge.to) {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagKind::MultipleDrivers,
                        format!(
                            "input '{}' is driven by both edge '{}' and edge '{}'",
                            edge.to, first, edge.id
                        ),
                    )
                    .with_port(&edge.to)
                    .with_edge(first)
                    .with_edge(&edge.id),
                );
                continue;
            }
            drivers.insert(edge.to.clone(), edge.id.clone());

            let origin = Origin::Edge(edge.id.clone());
            self.relate_payload(&edge.from, &edge.to, origin.clone());
            self.relate_unit(&edge.from, &edge.to, origin.clone());
            self.set.cardinality.push(CardConstraint::Equal {
                a: edge.from.clone(),
                b: edge.to.clone(),
                origin,
            });
            self.set.edge_pairs.push(EdgePair {
                edge: edge.id.clone(),
                from: edge.from.clone(),
                to: edge.to.clone(),
            });
        }
    }

    /// Report a dangling or misdirected endpoint. Unknown-block nodes were
    /// already reported, so edges touching them are skipped silently.
    fn check_endpoint(
        &mut self,
        edge: &crate::graph::Edge,
        key: &PortKey,
        expected: PortDir,
        graph: &DraftGraph,
    ) -> bool {
        match self.set.ports.get(key) {
            Some(info) if info.dir == expected => return true,
            Some(_) => {
                let side = match expected {
                    PortDir::Output => "source",
                    PortDir::Input => "target",
                };
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagKind::DanglingEdge,
                        format!("edge '{}' uses '{}' as its {}, which has the wrong direction", edge.id, key, side),
                    )
                    .with_edge(&edge.id)
                    .with_port(key),
                );
                return false;
            }
            None => {}
        }
        let node_known = self.set.ports.keys().any(|k| k.node == key.node);
        if graph.node(&key.node).is_some() && !node_known {
            // Node exists but its block is unknown; already reported.
            return false;
        }
        let message = if graph.node(&key.node).is_none() {
            format!("edge '{}' references missing node '{}'", edge.id, key.node)
        } else {
            format!("edge '{}' references missing port '{}'", edge.id, key)
        };
        self.diagnostics.push(
            Diagnostic::new(DiagKind::DanglingEdge, message).with_edge(&edge.id),
        );
        false
    }

    fn relate_payload(&mut self, a: &PortKey, b: &PortKey, origin: Origin) {
        let (Some(ia), Some(ib)) = (self.set.ports.get(a), self.set.ports.get(b)) else {
            return;
        };
        if let Some(c) = relate(a, &ia.ty.payload, b, &ib.ty.payload, origin) {
            self.set.payload.push(c);
        }
    }

    fn relate_unit(&mut self, a: &PortKey, b: &PortKey, origin: Origin) {
        let (Some(ia), Some(ib)) = (self.set.ports.get(a), self.set.ports.get(b)) else {
            return;
        };
        if let Some(c) = relate(a, &ia.ty.unit, b, &ib.ty.unit, origin) {
            self.set.unit.push(c);
        }
    }
}

/// Equate two port axes. Two concrete sides yield nothing.
fn relate<T: Clone>(
    a: &PortKey,
    axis_a: &Axis<T>,
    b: &PortKey,
    axis_b: &Axis<T>,
    origin: Origin,
) -> Option<AxisConstraint<T>> {
    match (axis_a, axis_b) {
        (Axis::Var(va), Axis::Var(vb)) => Some(AxisConstraint::Equal {
            a: a.clone(),
            b: b.clone(),
            lhs: VarKey::new(&a.node, va.as_str()),
            rhs: VarKey::new(&b.node, vb.as_str()),
            origin,
        }),
        (Axis::Var(v), Axis::Inst(value)) => Some(AxisConstraint::Fixed {
            port: a.clone(),
            var: VarKey::new(&a.node, v.as_str()),
            value: value.clone(),
            source: b.clone(),
            origin,
        }),
        (Axis::Inst(value), Axis::Var(v)) => Some(AxisConstraint::Fixed {
            port: b.clone(),
            var: VarKey::new(&b.node, v.as_str()),
            value: value.clone(),
            source: a.clone(),
            origin,
        }),
        (Axis::Inst(_), Axis::Inst(_)) => None,
    }
}

/// Node-scoped variables carried by each port, per axis.
#[derive(Debug, Clone, Default)]
pub struct VarBindings {
    pub payload: BTreeMap<PortKey, VarKey>,
    pub unit: BTreeMap<PortKey, VarKey>,
    pub cardinality: BTreeMap<PortKey, VarKey>,
}

impl ConstraintSet {
    /// Which variable each polymorphic port axis refers to.
    pub fn bindings(&self) -> VarBindings {
        let mut b = VarBindings::default();
        for (key, info) in &self.ports {
            if let Axis::Var(v) = &info.ty.payload {
                b.payload.insert(key.clone(), VarKey::new(&key.node, v.as_str()));
            }
            if let Axis::Var(v) = &info.ty.unit {
                b.unit.insert(key.clone(), VarKey::new(&key.node, v.as_str()));
            }
            if let Axis::Var(v) = &info.ty.cardinality {
                b.cardinality
                    .insert(key.clone(), VarKey::new(&key.node, v.as_str()));
            }
        }
        b
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
