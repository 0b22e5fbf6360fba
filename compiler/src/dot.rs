// dot.rs — Graphviz DOT output for typed graphs
//
// Transforms a TypedGraph into DOT format suitable for rendering with `dot`
// or other Graphviz layout engines. Inserted adapters, unresolved nodes and
// cycle edges are styled so the normalizer's decisions are visible.
//
// Preconditions: `typed` comes from the normalizer; `cycles` from the same run.
// Postconditions: returns a valid DOT string; output order follows id order.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use crate::graph::{CycleClass, CycleReport, Provenance};
use crate::id::NodeId;
use crate::lower::{TypedGraph, TypedNode};
use crate::types::PortType;

/// Emit the typed graph as a Graphviz DOT string.
pub fn emit_dot(typed: &TypedGraph, cycles: &[CycleReport]) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "digraph normc {{");
    let _ = writeln!(buf, "    rankdir=LR;");
    let _ = writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];");
    let _ = writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];");
    let _ = writeln!(buf);

    for node in typed.nodes.values() {
        let _ = writeln!(buf, "    {} [{}];", quote(node.id.as_str()), node_attrs(node));
    }

    let cycle_class = cycle_membership(cycles);
    let _ = writeln!(buf);
    for edge in typed.edges.values() {
        let src = quote(edge.from.node.as_str());
        let tgt = quote(edge.to.node.as_str());
        let label = match &edge.ty {
            Some(ty) => ty.to_string(),
            None => "?".to_string(),
        };
        let mut attrs = format!("label={}", quote(&label));
        let from_class = cycle_class.get(&edge.from.node);
        if from_class.is_some() && from_class == cycle_class.get(&edge.to.node) {
            match from_class.map(|(_, class)| class) {
                Some(CycleClass::IllegalInstantaneous) => attrs.push_str(", style=bold, color=red"),
                _ => attrs.push_str(", style=bold, color=blue"),
            }
        }
        if edge.ty.is_none() {
            attrs.push_str(", style=dashed");
        }
        let _ = writeln!(buf, "    {src} -> {tgt} [{attrs}];");
    }

    let _ = writeln!(buf, "}}");
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Quote an id or label as a DOT string literal.
fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn node_attrs(node: &TypedNode) -> String {
    let concrete = node.ports.values().all(PortType::is_concrete);
    let (style, color, label) = match &node.provenance {
        Provenance::Inserted { rule, .. } => (
            "\"filled,dashed\"",
            "lightyellow",
            format!("{}\n{}", rule, node.id),
        ),
        Provenance::Authored if !concrete => {
            ("filled", "lightsalmon", format!("{}\n{}", node.id, node.block))
        }
        Provenance::Authored => ("filled", "lightblue", format!("{}\n{}", node.id, node.block)),
    };
    format!(
        "shape=box, style={style}, fillcolor={color}, label={}",
        quote(&label)
    )
}

/// Map each node in a nontrivial SCC to (component index, class).
fn cycle_membership(cycles: &[CycleReport]) -> BTreeMap<NodeId, (usize, CycleClass)> {
    let mut out = BTreeMap::new();
    for (i, cycle) in cycles.iter().enumerate() {
        let members: BTreeSet<&NodeId> = cycle.nodes.iter().collect();
        for node in members {
            out.insert(node.clone(), (i, cycle.class));
        }
    }
    out
}

// ── Tests ───────────────────────────────────────────────────────────────────
