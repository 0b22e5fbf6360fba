// cardinality.rs — Cardinality solver with zip-broadcast groups
//
// Cardinality cannot be solved by plain unification: a block that zips its
// inputs lets a single-valued input broadcast against many-valued siblings, so
// members of a zip-broadcast group must not be equated pairwise. The solver
// runs five phases over one union-find slot per port:
//
//   1. build      template equalities merge slots; groups are recorded
//   2. seed       concrete base values are bound, except group members whose
//                 declared base is `one`, which stay pending and unbound;
//                 a `fixed` pin is bound like any other value
//   3. propagate  edge equalities merge slots; pending members cannot conflict
//   4. groups     spread `many(instance)` through groups to a fixpoint, then
//                 commit `one` to whatever is still open, again to a fixpoint
//   5. finalize   report unresolved classes; emit the variable substitution
//                 and per-port overrides
//
// Preconditions: `set` comes from `constraints::extract`.
// Postconditions: a single-valued input is never widened to many; an output
//   member always equals its group value; every reported port state is
//   Concrete, Pending (only inside a conflicted group) or Unresolved.
// Failure modes: disagreeing values (E0110, naming instance domains),
//   unconstrained classes (E0111).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::constraints::{CardConstraint, ConstraintSet, Origin, ZipMember, ZipRole};
use crate::diag::{DiagKind, Diagnostic};
use crate::id::{NodeId, PortKey, VarKey};
use crate::type_infer::origin_text;
use crate::types::{Axis, Cardinality};
use crate::unify::UnionFind;

// ── Output types ────────────────────────────────────────────────────────────

/// Solver state of one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum CardState {
    Concrete(Cardinality),
    /// Default held back from the union-find until group resolution.
    Pending(Cardinality),
    Unresolved,
}

pub struct CardinalityResult {
    pub vars: BTreeMap<VarKey, Cardinality>,
    /// Ports with a concrete base cardinality that group resolution changed.
    pub overrides: BTreeMap<PortKey, Cardinality>,
    pub ports: BTreeMap<PortKey, CardState>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn solve_cardinality(set: &ConstraintSet) -> CardinalityResult {
    let mut solver = CardSolver {
        uf: UnionFind::new(),
        groups: Vec::new(),
        pending: BTreeMap::new(),
        conflicted: BTreeSet::new(),
        diagnostics: Vec::new(),
    };
    solver.build(set);
    solver.seed(set);
    solver.propagate(set);
    solver.resolve_groups();
    solver.finalize(set)
}

// ── Solver engine ───────────────────────────────────────────────────────────

struct Group {
    node: NodeId,
    members: Vec<ZipMember>,
}

struct CardSolver {
    uf: UnionFind<PortKey, Cardinality>,
    groups: Vec<Group>,
    pending: BTreeMap<PortKey, Cardinality>,
    /// Groups already reported; they are skipped by later phases.
    conflicted: BTreeSet<NodeId>,
    diagnostics: Vec<Diagnostic>,
}

impl CardSolver {
    fn build(&mut self, set: &ConstraintSet) {
        for key in set.ports.keys() {
            self.uf.insert(key);
        }
        for c in &set.cardinality {
            match c {
                CardConstraint::Equal {
                    a,
                    b,
                    origin: origin @ Origin::Template(_),
                } => self.merge(a, b, origin),
                CardConstraint::ZipBroadcast { group, members } => self.groups.push(Group {
                    node: group.clone(),
                    members: members.clone(),
                }),
                _ => {}
            }
        }
    }

    fn seed(&mut self, set: &ConstraintSet) {
        for c in &set.cardinality {
            let CardConstraint::Fixed { port, value } = c else {
                continue;
            };
            let deferred = set
                .ports
                .get(port)
                .is_some_and(|p| p.zip_member && !p.pinned);
            if deferred && *value == Cardinality::One {
                self.pending.insert(port.clone(), value.clone());
                continue;
            }
            if let Err(conflict) = self.uf.assign(port, value.clone()) {
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagKind::CardinalityConflict,
                        format!(
                            "cardinality conflict at '{}': declared {} but its block template requires {}",
                            port, conflict.incoming, conflict.existing
                        ),
                    )
                    .with_port(port),
                );
            }
        }
    }

    fn propagate(&mut self, set: &ConstraintSet) {
        for c in &set.cardinality {
            if let CardConstraint::Equal {
                a,
                b,
                origin: origin @ Origin::Edge(_),
            } = c
            {
                self.merge(a, b, origin);
            }
        }
    }

    fn merge(&mut self, a: &PortKey, b: &PortKey, origin: &Origin) {
        if let Err(conflict) = self.uf.union(a, b) {
            let mut d = Diagnostic::new(
                DiagKind::CardinalityConflict,
                format!(
                    "cardinality conflict across {}: '{}' is {} but '{}' is {}",
                    origin_text(origin),
                    a,
                    conflict.existing,
                    b,
                    conflict.incoming
                ),
            )
            .with_port(a)
            .with_port(b);
            if let Origin::Edge(edge) = origin {
                d = d.with_edge(edge);
            }
            if is_domain_mismatch(&conflict.existing, &conflict.incoming) {
                d = d.with_hint("values from different instance domains cannot be combined");
            }
            self.diagnostics.push(d);
        }
    }

    // ── Phase 4 ──

    fn resolve_groups(&mut self) {
        // Many first: a concrete many always wins over one.
        while self.spread_many() {}
        while self.commit_one() {}
    }

    /// One sweep over all groups; returns whether any slot was bound.
    fn spread_many(&mut self) -> bool {
        let mut changed = false;
        for gi in 0..self.groups.len() {
            if self.conflicted.contains(&self.groups[gi].node) {
                continue;
            }
            let members = self.groups[gi].members.clone();
            let node = self.groups[gi].node.clone();

            let instances: BTreeSet<Cardinality> = members
                .iter()
                .filter_map(|m| self.uf.value(&m.port))
                .filter(|c| c.instance().is_some())
                .collect();
            let value = match instances.len() {
                0 => continue,
                1 => instances.into_iter().next(),
                _ => {
                    let domains: Vec<String> = instances
                        .iter()
                        .filter_map(|c| c.instance().map(|i| format!("'{}'", i)))
                        .collect();
                    self.group_conflict(
                        &node,
                        &members,
                        format!(
                            "broadcast group '{}' mixes instance domains {}",
                            node,
                            domains.join(" and ")
                        ),
                    );
                    continue;
                }
            };
            let Some(value) = value else { continue };
            changed |= self.apply_group_value(&node, &members, &value);
        }
        changed
    }

    fn commit_one(&mut self) -> bool {
        let mut changed = false;
        for gi in 0..self.groups.len() {
            if self.conflicted.contains(&self.groups[gi].node) {
                continue;
            }
            let members = self.groups[gi].members.clone();
            let node = self.groups[gi].node.clone();

            let values: Vec<Option<Cardinality>> =
                members.iter().map(|m| self.uf.value(&m.port)).collect();
            if values.iter().flatten().any(|c| c.instance().is_some()) {
                continue;
            }
            let has_one = members.iter().zip(&values).any(|(m, v)| {
                self.pending.contains_key(&m.port) || *v == Some(Cardinality::One)
            });
            if !has_one {
                continue;
            }
            changed |= self.apply_group_value(&node, &members, &Cardinality::One);
        }
        changed
    }

    /// Check closed member slots against `value`, then bind the open ones.
    /// A conflicting group is reported and left untouched.
    fn apply_group_value(
        &mut self,
        node: &NodeId,
        members: &[ZipMember],
        value: &Cardinality,
    ) -> bool {
        for m in members {
            let Some(existing) = self.uf.value(&m.port) else {
                continue;
            };
            let broadcast_input = m.role == ZipRole::Input
                && matches!(existing, Cardinality::One | Cardinality::Zero);
            if existing == *value || broadcast_input {
                continue;
            }
            let message = match m.role {
                ZipRole::Output => format!(
                    "output '{}' of broadcast group '{}' carries {} but is connected as {}",
                    m.port, node, value, existing
                ),
                ZipRole::Input => format!(
                    "input '{}' of broadcast group '{}' is {} but the group is {}",
                    m.port, node, existing, value
                ),
            };
            self.group_conflict(node, members, message);
            return false;
        }

        let mut changed = false;
        for m in members {
            if self.uf.value(&m.port).is_none() && self.uf.assign(&m.port, value.clone()).is_ok() {
                changed = true;
            }
        }
        changed
    }

    fn group_conflict(&mut self, node: &NodeId, members: &[ZipMember], message: String) {
        if !self.conflicted.insert(node.clone()) {
            return;
        }
        let mut d = Diagnostic::new(DiagKind::CardinalityConflict, message)
            .with_node(node)
            .with_hint("a broadcast group can zip one instance domain with single values only");
        for m in members {
            d = d.with_port(&m.port);
        }
        self.diagnostics.push(d);
    }

    // ── Phase 5 ──

    fn finalize(mut self, set: &ConstraintSet) -> CardinalityResult {
        let conflicted_ports: BTreeSet<PortKey> = self
            .groups
            .iter()
            .filter(|g| self.conflicted.contains(&g.node))
            .flat_map(|g| g.members.iter().map(|m| m.port.clone()))
            .collect();

        let mut ports = BTreeMap::new();
        let mut overrides = BTreeMap::new();
        let mut vars = BTreeMap::new();
        let mut open: BTreeMap<usize, Vec<PortKey>> = BTreeMap::new();

        for (key, info) in &set.ports {
            let state = match self.uf.value(key) {
                Some(value) => CardState::Concrete(value),
                None => match self.pending.get(key) {
                    Some(default) => CardState::Pending(default.clone()),
                    None => {
                        if !conflicted_ports.contains(key) {
                            let root = self.uf.root(key);
                            open.entry(root).or_default().push(key.clone());
                        }
                        CardState::Unresolved
                    }
                },
            };
            if let CardState::Concrete(value) = &state {
                match &info.ty.cardinality {
                    Axis::Var(name) => {
                        vars.insert(VarKey::new(&key.node, name.as_str()), value.clone());
                    }
                    Axis::Inst(base) if base != value => {
                        overrides.insert(key.clone(), value.clone());
                    }
                    Axis::Inst(_) => {}
                }
            }
            ports.insert(key.clone(), state);
        }

        for members in open.into_values() {
            let names: Vec<String> = members.iter().map(|p| format!("'{}'", p)).collect();
            let mut d = Diagnostic::new(
                DiagKind::UnresolvedCardinality,
                format!("cannot infer the cardinality of {}", names.join(", ")),
            )
            .with_hint("connect a source or give the port a concrete cardinality");
            for p in &members {
                d = d.with_port(p);
            }
            self.diagnostics.push(d);
        }

        CardinalityResult {
            vars,
            overrides,
            ports,
            diagnostics: self.diagnostics,
        }
    }
}

fn is_domain_mismatch(a: &Cardinality, b: &Cardinality) -> bool {
    matches!((a, b), (Cardinality::Many(x), Cardinality::Many(y)) if x != y)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BlockCatalog;
    use crate::constraints::extract;
    use crate::graph::{DraftGraph, GraphBuilder};

    fn solve(graph: &DraftGraph) -> CardinalityResult {
        let ex = extract(graph, &BlockCatalog::standard().unwrap());
        assert!(ex.diagnostics.is_empty(), "{:?}", ex.diagnostics);
        solve_cardinality(&ex.constraints)
    }

    fn key(s: &str) -> PortKey {
        PortKey::try_from(s.to_string()).unwrap()
    }

    fn state(r: &CardinalityResult, port: &str) -> CardState {
        r.ports[&key(port)].clone()
    }

    #[test]
    fn variable_follows_source() {
        let graph = GraphBuilder::new()
            .node("g", "Grid")
            .node("sm", "Smooth")
            .edge("e1", "g.index", "sm.x")
            .build()
            .unwrap();
        let r = solve(&graph);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert_eq!(
            r.vars[&VarKey::new(&NodeId::new("sm"), "C")],
            Cardinality::many("grid")
        );
        assert_eq!(state(&r, "sm.y"), CardState::Concrete(Cardinality::many("grid")));
    }

    #[test]
    fn one_input_broadcasts_against_many() {
        let graph = GraphBuilder::new()
            .node("t", "Time")
            .node("sm", "Smooth")
            .node("p", "Particles")
            .node("add", "Add")
            .edge("e1", "t.t", "sm.x")
            .edge("e2", "sm.y", "add.a")
            .edge("e3", "p.t", "add.b")
            .build()
            .unwrap();
        let r = solve(&graph);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert_eq!(state(&r, "add.a"), CardState::Concrete(Cardinality::One));
        assert_eq!(
            state(&r, "add.out"),
            CardState::Concrete(Cardinality::many("particles"))
        );
        assert_eq!(r.overrides[&key("add.b")], Cardinality::many("particles"));
        assert_eq!(r.overrides[&key("add.out")], Cardinality::many("particles"));
        assert!(!r.overrides.contains_key(&key("add.a")));
        // The upstream single value is never widened.
        assert_eq!(state(&r, "sm.y"), CardState::Concrete(Cardinality::One));
    }

    #[test]
    fn unconnected_group_defaults_to_one() {
        let graph = GraphBuilder::new().node("add", "Add").build().unwrap();
        let r = solve(&graph);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        for port in ["add.a", "add.b", "add.out"] {
            assert_eq!(state(&r, port), CardState::Concrete(Cardinality::One));
        }
        assert!(r.overrides.is_empty());
    }

    #[test]
    fn many_spreads_through_chained_groups() {
        let graph = GraphBuilder::new()
            .node("p", "Particles")
            .node("add1", "Add")
            .node("add2", "Add")
            .node("sin", "Sin")
            .edge("e1", "p.t", "add1.a")
            .edge("e2", "add1.out", "add2.a")
            .edge("e3", "add2.out", "sin.x")
            .build()
            .unwrap();
        let r = solve(&graph);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert_eq!(
            state(&r, "sin.y"),
            CardState::Concrete(Cardinality::many("particles"))
        );
        assert_eq!(state(&r, "add2.b"), CardState::Concrete(Cardinality::many("particles")));
    }

    #[test]
    fn mixed_domains_conflict_names_both() {
        let graph = GraphBuilder::new()
            .node("p", "Particles")
            .node("g", "Grid")
            .node("add", "Add")
            .edge("e1", "p.t", "add.a")
            .edge("e2", "g.index", "add.b")
            .build()
            .unwrap();
        let r = solve(&graph);
        assert_eq!(r.diagnostics.len(), 1, "{:?}", r.diagnostics);
        let d = &r.diagnostics[0];
        assert_eq!(d.kind, DiagKind::CardinalityConflict);
        assert_eq!(
            d.message,
            "broadcast group 'add' mixes instance domains 'grid' and 'particles'"
        );
    }

    #[test]
    fn many_output_into_single_valued_sink_conflicts() {
        let graph = GraphBuilder::new()
            .node("p", "Particles")
            .node("add", "Add")
            .node("osc", "Phasor")
            .edge("e1", "p.t", "add.a")
            .edge("e2", "add.out", "osc.rate")
            .build()
            .unwrap();
        let r = solve(&graph);
        assert_eq!(r.diagnostics.len(), 1, "{:?}", r.diagnostics);
        assert!(r.diagnostics[0].message.starts_with("output 'add.out'"));
        // Conflicted group keeps its pending member explicit.
        assert_eq!(state(&r, "add.b"), CardState::Pending(Cardinality::One));
    }

    #[test]
    fn concrete_edge_mismatch_conflicts() {
        let graph = GraphBuilder::new()
            .node("g", "Grid")
            .node("osc", "Phasor")
            .edge("e1", "g.index", "osc.rate")
            .build()
            .unwrap();
        let r = solve(&graph);
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(
            r.diagnostics[0].message,
            "cardinality conflict across edge 'e1': 'g.index' is many(grid) but 'osc.rate' is one"
        );
    }

    #[test]
    fn isolated_variable_is_unresolved() {
        let graph = GraphBuilder::new().node("sin", "Sin").build().unwrap();
        let r = solve(&graph);
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].kind, DiagKind::UnresolvedCardinality);
        assert_eq!(
            r.diagnostics[0].message,
            "cannot infer the cardinality of 'sin.x', 'sin.y'"
        );
        assert_eq!(state(&r, "sin.x"), CardState::Unresolved);
    }

    #[test]
    fn zero_input_is_legal_broadcast() {
        let graph = GraphBuilder::new()
            .node("k", "Constant")
            .node("g", "Grid")
            .node("add", "Add")
            .edge("e1", "k.out", "add.a")
            .edge("e2", "g.index", "add.b")
            .build()
            .unwrap();
        let r = solve(&graph);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert_eq!(state(&r, "add.a"), CardState::Concrete(Cardinality::Zero));
        assert_eq!(state(&r, "add.out"), CardState::Concrete(Cardinality::many("grid")));
    }

    #[test]
    fn fixed_one_member_is_not_widened() {
        let mut catalog = BlockCatalog::standard().unwrap();
        catalog
            .load_json_str(
                r#"{"blocks":[{
                    "name":"Mix",
                    "inputs":[
                        {"name":"a","type":"float:?U"},
                        {"name":"k","type":"float:?K"}
                    ],
                    "outputs":[{"name":"out","type":"float:?U"}],
                    "constraints":[
                        {"kind":"zip_broadcast","ports":["a","k","out"]},
                        {"kind":"fixed","port":"k","type":"float:scalar@one"}
                    ]
                }]}"#,
                "test",
            )
            .unwrap();
        let graph = GraphBuilder::new()
            .node("g", "Grid")
            .node("m", "Mix")
            .edge("e1", "g.index", "m.a")
            .build()
            .unwrap();
        let ex = extract(&graph, &catalog);
        assert!(ex.diagnostics.is_empty(), "{:?}", ex.diagnostics);
        assert!(ex.constraints.ports[&key("m.k")].pinned);
        assert!(!ex.constraints.ports[&key("m.a")].pinned);

        let r = solve_cardinality(&ex.constraints);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert_eq!(state(&r, "m.k"), CardState::Concrete(Cardinality::One));
        assert_eq!(state(&r, "m.out"), CardState::Concrete(Cardinality::many("grid")));
        assert!(!r.overrides.contains_key(&key("m.k")));
    }
}
