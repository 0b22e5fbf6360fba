// adapters.rs — Adapter registry and insertion
//
// The registry is built once from the catalog blocks that carry an
// `AdapterSpec`. Each rule converts one (payload, unit) pattern into another
// and preserves the whole extent. Insertion walks the edges in id order and,
// for every edge whose resolved endpoint types differ, splices in the single
// rule that converts between them.
//
// Preconditions: endpoint types come from the current iteration's solution.
// Postconditions: an edge is rewritten only when exactly one rule applies;
//   inserted ids depend only on the replaced edge's endpoints and the rule.
// Failure modes: no applicable rule (E0200), several applicable rules (E0201).
//   In both cases the edge is left untouched.
// Side effects: none. Returns a new graph.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::{adapter_patterns, AdapterKernel, BlockCatalog, TypePattern};
use crate::constraints::EdgePair;
use crate::diag::{DiagKind, Diagnostic};
use crate::graph::{DraftGraph, Edge, Node, Provenance};
use crate::id::{adapter_edge_id, adapter_node_id, EdgeId, NodeId, PortKey};
use crate::types::{CanonicalType, PortType};

// ── Registry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdapterRule {
    /// Rule id; equal to the adapter block name.
    pub id: String,
    pub from: TypePattern,
    pub to: TypePattern,
    pub node_type: String,
    pub input_port: String,
    pub output_port: String,
    pub cost: u32,
    pub kernel: AdapterKernel,
}

impl AdapterRule {
    /// Whether this rule converts `from` into `to`. Extents must already agree.
    pub fn matches(&self, from: &CanonicalType, to: &CanonicalType) -> bool {
        from.same_extent(to) && pattern_matches(&self.from, from) && pattern_matches(&self.to, to)
    }
}

fn pattern_matches(pattern: &TypePattern, ty: &CanonicalType) -> bool {
    pattern.payload.map_or(true, |p| p == ty.payload())
        && pattern.unit.map_or(true, |u| u == ty.unit())
        && pattern.temporality == ty.extent().temporality
}

/// Immutable rule table, ordered by rule id.
#[derive(Debug, Clone, Default)]
pub struct AdapterRegistry {
    rules: Vec<AdapterRule>,
}

impl AdapterRegistry {
    pub fn from_catalog(catalog: &BlockCatalog) -> Self {
        let rules = catalog
            .blocks()
            .filter_map(|def| {
                let spec = def.adapter.as_ref()?;
                let (from, to) = adapter_patterns(def)?;
                Some(AdapterRule {
                    id: def.name.clone(),
                    from,
                    to,
                    node_type: def.name.clone(),
                    input_port: def.inputs.first()?.name.clone(),
                    output_port: def.outputs.first()?.name.clone(),
                    cost: spec.cost,
                    kernel: spec.kernel,
                })
            })
            .collect();
        AdapterRegistry { rules }
    }

    pub fn rules(&self) -> &[AdapterRule] {
        &self.rules
    }

    /// Every rule converting `from` into `to`, in id order.
    pub fn candidates(&self, from: &CanonicalType, to: &CanonicalType) -> Vec<&AdapterRule> {
        self.rules.iter().filter(|r| r.matches(from, to)).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ── Insertion ───────────────────────────────────────────────────────────────

/// One splice performed by `insert_adapters`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertedAdapter {
    pub node: NodeId,
    pub rule: String,
    pub replaced_edge: EdgeId,
    pub from: CanonicalType,
    pub to: CanonicalType,
}

pub struct InsertResult {
    pub graph: DraftGraph,
    pub inserted: Vec<InsertedAdapter>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Splice adapters into every edge whose endpoint types differ.
///
/// Edges with a non-concrete endpoint, or whose cardinalities disagree, are
/// skipped: the solvers have already reported them.
pub fn insert_adapters(
    graph: &DraftGraph,
    edge_pairs: &[EdgePair],
    port_types: &BTreeMap<PortKey, PortType>,
    registry: &AdapterRegistry,
) -> InsertResult {
    let mut next = graph.clone();
    let mut inserted = Vec::new();
    let mut diagnostics = Vec::new();

    for pair in edge_pairs {
        let (Some(from), Some(to)) = (
            concrete(port_types, &pair.from),
            concrete(port_types, &pair.to),
        ) else {
            continue;
        };
        if from == to || !from.same_cardinality(&to) {
            continue;
        }

        let candidates = registry.candidates(&from, &to);
        let rule = match candidates.as_slice() {
            [] => {
                diagnostics.push(
                    Diagnostic::new(
                        DiagKind::NoConversionPath,
                        format!(
                            "no adapter converts {} to {} on edge '{}' ('{}' -> '{}')",
                            from, to, pair.edge, pair.from, pair.to
                        ),
                    )
                    .with_edge(&pair.edge)
                    .with_port(&pair.from)
                    .with_port(&pair.to)
                    .with_hint("register an adapter block for this conversion or change one endpoint"),
                );
                continue;
            }
            [rule] => *rule,
            many => {
                let names: Vec<&str> = many.iter().map(|r| r.id.as_str()).collect();
                diagnostics.push(
                    Diagnostic::new(
                        DiagKind::AmbiguousAdapter,
                        format!(
                            "{} adapters convert {} to {} on edge '{}': {}",
                            many.len(),
                            from,
                            to,
                            pair.edge,
                            names.join(", ")
                        ),
                    )
                    .with_edge(&pair.edge)
                    .with_hint("insert the intended adapter block explicitly"),
                );
                continue;
            }
        };

        let node_id = adapter_node_id(&pair.from, &pair.to, &rule.id);
        if next.node(&node_id).is_some() {
            diagnostics.push(
                Diagnostic::new(
                    DiagKind::NoConversionPath,
                    format!(
                        "cannot splice {} into edge '{}': node id '{}' is already taken",
                        rule.id, pair.edge, node_id
                    ),
                )
                .with_edge(&pair.edge)
                .with_node(&node_id),
            );
            continue;
        }

        match splice(&mut next, pair, rule, &node_id) {
            Ok(()) => {
                tracing::trace!(edge = %pair.edge, adapter = %node_id, rule = %rule.id, "spliced adapter");
                inserted.push(InsertedAdapter {
                    node: node_id,
                    rule: rule.id.clone(),
                    replaced_edge: pair.edge.clone(),
                    from,
                    to,
                });
            }
            Err(err) => {
                diagnostics.push(
                    Diagnostic::new(
                        DiagKind::NoConversionPath,
                        format!("cannot splice {} into edge '{}': {}", rule.id, pair.edge, err),
                    )
                    .with_edge(&pair.edge),
                );
            }
        }
    }

    InsertResult {
        graph: next,
        inserted,
        diagnostics,
    }
}

fn concrete(port_types: &BTreeMap<PortKey, PortType>, key: &PortKey) -> Option<CanonicalType> {
    port_types.get(key)?.to_canonical().ok()
}

/// Replace `pair.edge` with `from -> adapter -> to`.
fn splice(
    graph: &mut DraftGraph,
    pair: &EdgePair,
    rule: &AdapterRule,
    node_id: &NodeId,
) -> Result<(), crate::graph::GraphError> {
    let in_edge = Edge {
        id: adapter_edge_id(node_id, &rule.input_port),
        from: pair.from.clone(),
        to: PortKey {
            node: node_id.clone(),
            port: rule.input_port.clone(),
        },
    };
    let out_edge = Edge {
        id: adapter_edge_id(node_id, &rule.output_port),
        from: PortKey {
            node: node_id.clone(),
            port: rule.output_port.clone(),
        },
        to: pair.to.clone(),
    };
    if graph.edge(&in_edge.id).is_some() || graph.edge(&out_edge.id).is_some() {
        return Err(crate::graph::GraphError::DuplicateEdge(in_edge.id));
    }

    graph.add_node(Node {
        id: node_id.clone(),
        block: rule.node_type.clone(),
        port_types: BTreeMap::new(),
        provenance: Provenance::Inserted {
            rule: rule.id.clone(),
            replaced_edge: pair.edge.clone(),
        },
    })?;
    graph.remove_edge(&pair.edge);
    graph.add_edge(in_edge)?;
    graph.add_edge(out_edge)?;
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_canonical_type, parse_port_type};
    use crate::types::{PayloadType, Unit};

    fn registry() -> AdapterRegistry {
        AdapterRegistry::from_catalog(&BlockCatalog::standard().unwrap())
    }

    fn ty(text: &str) -> CanonicalType {
        parse_canonical_type(text).unwrap()
    }

    fn key(s: &str) -> PortKey {
        PortKey::try_from(s.to_string()).unwrap()
    }

    #[test]
    fn registry_is_sorted_and_complete() {
        let reg = registry();
        let ids: Vec<&str> = reg.rules().iter().map(|r| r.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(reg.len(), 8);
        let rule = reg.rules().iter().find(|r| r.id == "PhaseToRadians").unwrap();
        assert_eq!(rule.from.unit, Some(Unit::Phase01));
        assert_eq!(rule.to.payload, Some(PayloadType::Float));
        assert_eq!(rule.input_port, "in");
    }

    #[test]
    fn phase_to_radians_has_single_candidate() {
        let reg = registry();
        let found = reg.candidates(&ty("float:phase01"), &ty("float:radians"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "PhaseToRadians");
        assert_eq!(found[0].kernel.eval(0.25), std::f64::consts::FRAC_PI_2);
    }

    #[test]
    fn candidates_preserve_extent() {
        let reg = registry();
        assert_eq!(
            reg.candidates(&ty("float:phase01@many(p)"), &ty("float:radians@many(p)"))
                .len(),
            1
        );
        assert!(reg
            .candidates(&ty("float:phase01"), &ty("float:radians@many(p)"))
            .is_empty());
        assert!(reg
            .candidates(&ty("float:phase01"), &ty("float:radians!discrete"))
            .is_empty());
    }

    #[test]
    fn no_rule_for_phase_to_norm01() {
        assert!(registry()
            .candidates(&ty("float:phase01"), &ty("float:norm01"))
            .is_empty());
    }

    fn types(entries: &[(&str, &str)]) -> BTreeMap<PortKey, PortType> {
        entries
            .iter()
            .map(|(k, t)| (key(k), parse_port_type(t).unwrap()))
            .collect()
    }

    fn one_edge_graph() -> (DraftGraph, Vec<EdgePair>) {
        let graph = crate::graph::GraphBuilder::new()
            .node("osc", "Phasor")
            .node("sin", "Sin")
            .edge("e1", "osc.phase", "sin.x")
            .build()
            .unwrap();
        let pairs = vec![EdgePair {
            edge: EdgeId::new("e1"),
            from: key("osc.phase"),
            to: key("sin.x"),
        }];
        (graph, pairs)
    }

    #[test]
    fn splice_replaces_edge() {
        let (graph, pairs) = one_edge_graph();
        let port_types = types(&[("osc.phase", "float:phase01"), ("sin.x", "float:radians")]);
        let r = insert_adapters(&graph, &pairs, &port_types, &registry());
        assert!(r.diagnostics.is_empty());
        assert_eq!(r.inserted.len(), 1);
        let adapter = &r.inserted[0].node;
        assert!(adapter.as_str().starts_with("adapter.PhaseToRadians."));
        assert!(r.graph.edge(&EdgeId::new("e1")).is_none());
        let in_edge = r.graph.edge(&adapter_edge_id(adapter, "in")).unwrap();
        assert_eq!(in_edge.from, key("osc.phase"));
        let out_edge = r.graph.edge(&adapter_edge_id(adapter, "out")).unwrap();
        assert_eq!(out_edge.to, key("sin.x"));
        assert_eq!(
            r.graph.node(adapter).unwrap().provenance,
            Provenance::Inserted {
                rule: "PhaseToRadians".into(),
                replaced_edge: EdgeId::new("e1"),
            }
        );
        // Original graph untouched.
        assert!(graph.edge(&EdgeId::new("e1")).is_some());
    }

    #[test]
    fn matching_types_are_a_no_op() {
        let (graph, pairs) = one_edge_graph();
        let port_types = types(&[("osc.phase", "float:radians"), ("sin.x", "float:radians")]);
        let r = insert_adapters(&graph, &pairs, &port_types, &registry());
        assert!(r.inserted.is_empty());
        assert_eq!(r.graph, graph);
    }

    #[test]
    fn missing_rule_is_reported() {
        let (graph, pairs) = one_edge_graph();
        let port_types = types(&[("osc.phase", "float:phase01"), ("sin.x", "float:norm01")]);
        let r = insert_adapters(&graph, &pairs, &port_types, &registry());
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(
            r.diagnostics[0].message,
            "no adapter converts float:phase01 to float:norm01 on edge 'e1' ('osc.phase' -> 'sin.x')"
        );
        assert_eq!(r.graph, graph);
    }

    #[test]
    fn ambiguity_is_reported_and_edge_kept() {
        let mut catalog = BlockCatalog::standard().unwrap();
        catalog
            .load_json_str(
                r#"{"blocks":[{"name":"PhaseToRadiansFast",
                    "inputs":[{"name":"in","type":"float:phase01@?C"}],
                    "outputs":[{"name":"out","type":"float:radians@?C"}],
                    "adapter":{"kernel":{"op":"scale","factor":6.28}}}]}"#,
                "extra",
            )
            .unwrap();
        let reg = AdapterRegistry::from_catalog(&catalog);
        let (graph, pairs) = one_edge_graph();
        let port_types = types(&[("osc.phase", "float:phase01"), ("sin.x", "float:radians")]);
        let r = insert_adapters(&graph, &pairs, &port_types, &reg);
        assert!(r.inserted.is_empty());
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].kind, DiagKind::AmbiguousAdapter);
        assert!(r.diagnostics[0]
            .message
            .ends_with("PhaseToRadians, PhaseToRadiansFast"));
        assert_eq!(r.graph, graph);
    }

    #[test]
    fn non_concrete_endpoint_is_skipped() {
        let (graph, pairs) = one_edge_graph();
        let port_types = types(&[("osc.phase", "float:phase01"), ("sin.x", "float:?U")]);
        let r = insert_adapters(&graph, &pairs, &port_types, &registry());
        assert!(r.inserted.is_empty());
        assert!(r.diagnostics.is_empty());
    }
}
