// type_infer.rs — Payload/unit inference
//
// Solves the payload and unit axes independently with one union-find each.
// Equalities merge node-scoped variables; fixed constraints bind a class to a
// concrete value. The result is the payload and unit halves of the
// `Substitution`; the cardinality half comes from `cardinality.rs`.
//
// Preconditions: `set` comes from `constraints::extract`.
// Postconditions: every variable in the result is bound to a concrete value;
//   variables that stayed unbound are reported once per equivalence class.
// Failure modes: conflicting values (E0101/E0102), unbound classes
//   (E0103/E0104). Conflicting classes are not merged.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::constraints::{AxisConstraint, ConstraintSet, Origin};
use crate::diag::{DiagKind, Diagnostic};
use crate::id::{PortKey, VarKey};
use crate::types::{Cardinality, PayloadType, Unit};
use crate::unify::UnionFind;

// ── Output types ────────────────────────────────────────────────────────────

/// Concrete values for node-scoped variables, plus per-port cardinality
/// overrides for zip-broadcast members whose base type was concrete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitution {
    pub payload: BTreeMap<VarKey, PayloadType>,
    pub unit: BTreeMap<VarKey, Unit>,
    pub cardinality: BTreeMap<VarKey, Cardinality>,
    pub card_overrides: BTreeMap<PortKey, Cardinality>,
}

/// Result of payload/unit inference.
pub struct TypeInferResult {
    pub payload: BTreeMap<VarKey, PayloadType>,
    pub unit: BTreeMap<VarKey, Unit>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Solve payload and unit variables.
pub fn solve_payload_unit(set: &ConstraintSet) -> TypeInferResult {
    let bindings = set.bindings();
    let mut diagnostics = Vec::new();

    let payload = solve_axis(
        &set.payload,
        &bindings.payload,
        AxisSpec {
            name: "payload",
            conflict: DiagKind::PayloadConflict,
            unresolved: DiagKind::UnresolvedPayload,
        },
        &mut diagnostics,
    );
    let unit = solve_axis(
        &set.unit,
        &bindings.unit,
        AxisSpec {
            name: "unit",
            conflict: DiagKind::UnitConflict,
            unresolved: DiagKind::UnresolvedUnit,
        },
        &mut diagnostics,
    );

    TypeInferResult {
        payload,
        unit,
        diagnostics,
    }
}

pub(crate) fn origin_text(origin: &Origin) -> String {
    match origin {
        Origin::Edge(id) => format!("edge '{}'", id),
        Origin::Template(node) => format!("the block template of node '{}'", node),
    }
}

// ── Solver engine ───────────────────────────────────────────────────────────

struct AxisSpec {
    name: &'static str,
    conflict: DiagKind,
    unresolved: DiagKind,
}

fn solve_axis<T: Clone + PartialEq + fmt::Display>(
    constraints: &[AxisConstraint<T>],
    bindings: &BTreeMap<PortKey, VarKey>,
    spec: AxisSpec,
    diagnostics: &mut Vec<Diagnostic>,
) -> BTreeMap<VarKey, T> {
    let mut uf: UnionFind<VarKey, T> = UnionFind::new();
    for var in bindings.values() {
        uf.insert(var);
    }

    for c in constraints {
        match c {
            AxisConstraint::Equal {
                a,
                b,
                lhs,
                rhs,
                origin,
            } => {
                if let Err(conflict) = uf.union(lhs, rhs) {
                    diagnostics.push(
                        Diagnostic::new(
                            spec.conflict,
                            format!(
                                "{} conflict across {}: '{}' is {} but '{}' is {}",
                                spec.name,
                                origin_text(origin),
                                a,
                                conflict.existing,
                                b,
                                conflict.incoming
                            ),
                        )
                        .with_port(a)
                        .with_port(b),
                    );
                }
            }
            AxisConstraint::Fixed {
                port,
                var,
                value,
                source,
                origin,
            } => {
                if let Err(conflict) = uf.assign(var, value.clone()) {
                    let mut d = Diagnostic::new(
                        spec.conflict,
                        format!(
                            "{} conflict at '{}': already inferred {}, but {} supplies {} from '{}'",
                            spec.name,
                            port,
                            conflict.existing,
                            origin_text(origin),
                            conflict.incoming,
                            source
                        ),
                    )
                    .with_port(port)
                    .with_port(source);
                    if let Origin::Edge(edge) = origin {
                        d = d.with_edge(edge);
                    }
                    diagnostics.push(d);
                }
            }
        }
    }

    let mut resolved = BTreeMap::new();
    for (_, members) in uf.classes() {
        let value = members.first().and_then(|v| uf.value(v));
        match value {
            Some(value) => {
                for var in members {
                    resolved.insert(var, value.clone());
                }
            }
            None => {
                let ports: BTreeSet<&PortKey> = bindings
                    .iter()
                    .filter(|(_, v)| members.contains(v))
                    .map(|(p, _)| p)
                    .collect();
                let names: Vec<String> = ports.iter().map(|p| format!("'{}'", p)).collect();
                let mut d = Diagnostic::new(
                    spec.unresolved,
                    format!(
                        "cannot infer the {} of {}",
                        spec.name,
                        names.join(", ")
                    ),
                )
                .with_hint(format!(
                    "connect a source with a concrete {} or override the port type",
                    spec.name
                ));
                for p in ports {
                    d = d.with_port(p);
                }
                diagnostics.push(d);
            }
        }
    }
    resolved
}

// ── Tests ───────────────────────────────────────────────────────────────────
