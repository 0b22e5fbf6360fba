// pass.rs — Normalization pass table: descriptors, dependencies, artifacts
//
// Declares the normalizer's passes, their dependency edges, and the artifacts
// they produce. The pipeline runner uses this to compute the minimal pass
// subset for each --emit target. The four per-iteration passes (extract
// through insert_adapters) run inside the fixpoint loop whenever
// insert_adapters is required.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Extract,
    SolvePayloadUnit,
    SolveCardinality,
    InsertAdapters,
    ClassifyCycles,
    Lower,
}

/// What each pass leaves behind in `NormalizeState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Constraints,  // ConstraintSet
    PayloadUnit,  // payload/unit half of Substitution
    Cardinality,  // cardinality half of Substitution
    Graph,        // adapter-expanded DraftGraph
    Typed,        // TypedGraph
    Cycles,       // Vec<CycleReport>
    Cert,         // Cert
    Backend,      // BackendGraph
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a normalization pass.
pub struct PassDescriptor {
    /// Name printed in verbose timing lines and tracing events.
    pub name: &'static str,
    /// Passes whose artifacts this pass reads.
    pub inputs: &'static [PassId],
    pub outputs: &'static [ArtifactId],
    /// Whether the pass runs once per fixpoint iteration.
    pub per_iteration: bool,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Extract => PassDescriptor {
            name: "extract",
            inputs: &[],
            outputs: &[ArtifactId::Constraints],
            per_iteration: true,
            invariants: "every port of a known block has a declared type",
        },
        PassId::SolvePayloadUnit => PassDescriptor {
            name: "solve_payload_unit",
            inputs: &[PassId::Extract],
            outputs: &[ArtifactId::PayloadUnit],
            per_iteration: true,
            invariants: "conflicting classes never merged",
        },
        PassId::SolveCardinality => PassDescriptor {
            name: "solve_cardinality",
            inputs: &[PassId::Extract],
            outputs: &[ArtifactId::Cardinality],
            per_iteration: true,
            invariants: "single-valued inputs never widened",
        },
        PassId::InsertAdapters => PassDescriptor {
            name: "insert_adapters",
            inputs: &[PassId::SolvePayloadUnit, PassId::SolveCardinality],
            outputs: &[ArtifactId::Graph, ArtifactId::Typed],
            per_iteration: true,
            invariants: "an edge is rewritten only by a unique rule",
        },
        PassId::ClassifyCycles => PassDescriptor {
            name: "classify_cycles",
            inputs: &[PassId::InsertAdapters],
            outputs: &[ArtifactId::Cycles],
            per_iteration: false,
            invariants: "every nontrivial SCC classified",
        },
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[PassId::InsertAdapters, PassId::ClassifyCycles],
            outputs: &[ArtifactId::Cert, ArtifactId::Backend],
            per_iteration: false,
            invariants: "C1-C3 obligations verified, provenance erased",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order.
pub const ALL_PASSES: [PassId; 6] = [
    PassId::Extract,
    PassId::SolvePayloadUnit,
    PassId::SolveCardinality,
    PassId::InsertAdapters,
    PassId::ClassifyCycles,
    PassId::Lower,
];

/// Passes needed for `terminal`, dependencies first.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
