// pipeline.rs — Normalization state and fixpoint orchestration
//
// Holds every pass artifact in one state struct and runs the minimal set of
// passes for a given terminal PassId. The per-iteration passes (extract,
// solve_payload_unit, solve_cardinality, insert_adapters) repeat until adapter
// insertion leaves the graph unchanged; each iteration consumes the previous
// graph value and produces a new one.
//
// Preconditions: the catalog and adapter registry are built before
//   `run_pipeline`; the registry is derived from the same catalog.
// Postconditions: `state.diagnostics` holds the final iteration's diagnostics
//   followed by those of the once-only passes; `ready_for_backend` is true iff
//   no error-level diagnostic exists, every port of the final graph is
//   concrete and every lowering obligation holds.
// Failure modes: none are thrown. Exceeding `max_iterations` adds E0900.
// Side effects: calls on_pass_complete after each pass; emits tracing events.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::adapters::{insert_adapters, AdapterRegistry, InsertedAdapter};
use crate::cardinality::{solve_cardinality, CardState};
use crate::catalog::BlockCatalog;
use crate::constraints::{extract, ConstraintSet};
use crate::diag::{has_errors, DiagKind, Diagnostic};
use crate::graph::{classify_cycles, CycleClass, CycleReport, DraftGraph};
use crate::id::PortKey;
use crate::lower::{
    apply_substitution, build_typed_graph, lower_and_verify, BackendGraph, Cert, TypedGraph,
};
use crate::pass::{descriptor, required_passes, PassId};
use crate::type_infer::{solve_payload_unit, Substitution};
use crate::types::PortType;

// ── Options ────────────────────────────────────────────────────────────────

/// Tuning knobs for one normalization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Upper bound on fixpoint iterations, counting the final quiet one.
    pub max_iterations: usize,
    /// Run SCC classification after convergence.
    pub classify_cycles: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_iterations: 4,
            classify_cycles: true,
        }
    }
}

// ── Build info ─────────────────────────────────────────────────────────────

/// Hashes identifying the inputs of a run, for cache keys and `--emit build-info`.
///
/// `graph_hash`: SHA-256 of `DraftGraph::canonical_json()` of the input graph.
/// `catalog_fingerprint`: SHA-256 of `BlockCatalog::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub graph_hash: String,
    pub catalog_fingerprint: String,
    pub compiler_version: &'static str,
}

impl BuildInfo {
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"graph_hash\": \"{}\",\n  \"catalog_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.graph_hash, self.catalog_fingerprint, self.compiler_version,
        )
    }
}

pub fn compute_build_info(graph: &DraftGraph, catalog: &BlockCatalog) -> BuildInfo {
    BuildInfo {
        graph_hash: graph.fingerprint(),
        catalog_fingerprint: catalog.fingerprint(),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all normalization artifacts and accumulated diagnostics.
pub struct NormalizeState<'a> {
    pub catalog: &'a BlockCatalog,
    pub registry: &'a AdapterRegistry,
    /// Current graph value; replaced by each inserting iteration.
    pub graph: DraftGraph,
    pub constraints: Option<ConstraintSet>,
    pub substitution: Substitution,
    pub card_states: Option<BTreeMap<PortKey, CardState>>,
    pub port_types: Option<BTreeMap<PortKey, PortType>>,
    /// Every adapter spliced in, in insertion order.
    pub inserted: Vec<InsertedAdapter>,
    pub typed: Option<TypedGraph>,
    pub cycles: Vec<CycleReport>,
    pub cert: Option<Cert>,
    pub backend: Option<BackendGraph>,
    pub diagnostics: Vec<Diagnostic>,
    pub iterations: usize,
}

impl<'a> NormalizeState<'a> {
    pub fn new(graph: DraftGraph, catalog: &'a BlockCatalog, registry: &'a AdapterRegistry) -> Self {
        Self {
            catalog,
            registry,
            graph,
            constraints: None,
            substitution: Substitution::default(),
            card_states: None,
            port_types: None,
            inserted: Vec::new(),
            typed: None,
            cycles: Vec::new(),
            cert: None,
            backend: None,
            diagnostics: Vec::new(),
            iterations: 0,
        }
    }

    pub fn has_error(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    pub fn ready_for_backend(&self) -> bool {
        !self.has_error()
            && self
                .typed
                .as_ref()
                .is_some_and(TypedGraph::is_fully_concrete)
            && self.cert.is_some_and(|c| c.all_pass())
    }
}

/// Outcome of a full normalization run.
pub struct NormalizeResult {
    /// Adapter-expanded graph, still carrying provenance.
    pub graph: DraftGraph,
    pub typed: TypedGraph,
    /// Constraints of the final iteration.
    pub constraints: ConstraintSet,
    pub diagnostics: Vec<Diagnostic>,
    pub cycles: Vec<CycleReport>,
    pub iterations: usize,
    pub inserted: Vec<InsertedAdapter>,
    pub cert: Cert,
    /// Present only when `ready_for_backend`.
    pub backend: Option<BackendGraph>,
    pub ready_for_backend: bool,
}

// ── Pass bookkeeping ───────────────────────────────────────────────────────

/// Per-pass post-processing: callback, accumulate, verbose timing.
fn finish_pass(
    sink: &mut Vec<Diagnostic>,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) {
    on_pass_complete(pass_id, &diags);
    tracing::debug!(
        pass = descriptor(pass_id).name,
        diagnostics = diags.len(),
        "pass complete"
    );
    sink.extend(diags);
    if verbose {
        eprintln!(
            "normc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// When `terminal` requires insert_adapters, the per-iteration passes loop to
/// a fixpoint; otherwise they run once over the input graph.
pub fn run_pipeline(
    state: &mut NormalizeState<'_>,
    terminal: PassId,
    options: &NormalizeOptions,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) {
    let passes = required_passes(terminal);
    let (iterated, once): (Vec<PassId>, Vec<PassId>) = passes
        .iter()
        .copied()
        .partition(|p| descriptor(*p).per_iteration);
    let looping = iterated.contains(&PassId::InsertAdapters);

    loop {
        state.iterations += 1;
        tracing::debug!(iteration = state.iterations, "normalization iteration");
        let mut iteration_diags = Vec::new();
        let mut inserted_any = false;

        for &pass_id in &iterated {
            let t = Instant::now();
            let diags = match pass_id {
                PassId::Extract => {
                    let result = extract(&state.graph, state.catalog);
                    state.constraints = Some(result.constraints);
                    result.diagnostics
                }
                PassId::SolvePayloadUnit => {
                    let Some(set) = state.constraints.as_ref() else {
                        continue;
                    };
                    let result = solve_payload_unit(set);
                    state.substitution.payload = result.payload;
                    state.substitution.unit = result.unit;
                    result.diagnostics
                }
                PassId::SolveCardinality => {
                    let Some(set) = state.constraints.as_ref() else {
                        continue;
                    };
                    let result = solve_cardinality(set);
                    state.substitution.cardinality = result.vars;
                    state.substitution.card_overrides = result.overrides;
                    state.card_states = Some(result.ports);
                    result.diagnostics
                }
                PassId::InsertAdapters => {
                    let Some(set) = state.constraints.as_ref() else {
                        continue;
                    };
                    let (port_types, mut diags) = apply_substitution(set, &state.substitution);
                    let result =
                        insert_adapters(&state.graph, &set.edge_pairs, &port_types, state.registry);
                    diags.extend(result.diagnostics);
                    if result.inserted.is_empty() {
                        state.port_types = Some(port_types);
                    } else if state.iterations < options.max_iterations {
                        inserted_any = true;
                        state.graph = result.graph;
                        state.inserted.extend(result.inserted);
                    } else {
                        // Keep the last solved graph so the port types match it.
                        state.port_types = Some(port_types);
                        tracing::warn!(
                            iterations = state.iterations,
                            pending = result.inserted.len(),
                            "adapter insertion did not converge"
                        );
                        diags.push(
                            Diagnostic::new(
                                DiagKind::NonConvergence,
                                format!(
                                    "adapter insertion still changed the graph after {} iterations",
                                    state.iterations
                                ),
                            )
                            .with_hint("raise --max-iterations or check for adapter chains")
                            .with_cause(format!(
                                "{} more adapter(s) were pending",
                                result.inserted.len()
                            )),
                        );
                    }
                    diags
                }
                PassId::ClassifyCycles | PassId::Lower => continue,
            };
            finish_pass(
                &mut iteration_diags,
                pass_id,
                diags,
                t.elapsed(),
                verbose,
                &mut on_pass_complete,
            );
        }

        // Only the final iteration's diagnostics survive.
        state.diagnostics = iteration_diags;
        if !looping || !inserted_any {
            break;
        }
    }

    if let Some(port_types) = state.port_types.as_ref() {
        state.typed = Some(build_typed_graph(&state.graph, port_types));
    }

    for &pass_id in &once {
        let t = Instant::now();
        match pass_id {
            PassId::ClassifyCycles => {
                if !options.classify_cycles {
                    continue;
                }
                state.cycles = classify_cycles(&state.graph, state.catalog);
                let diags = cycle_diagnostics(&state.cycles);
                finish_pass(
                    &mut state.diagnostics,
                    pass_id,
                    diags,
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                );
            }
            PassId::Lower => {
                let Some(typed) = state.typed.as_ref() else {
                    continue;
                };
                let result = lower_and_verify(typed, state.catalog);
                if !result.cert.all_pass() {
                    tracing::debug!(cert = ?result.cert, "lowering obligations not met");
                }
                state.cert = Some(result.cert);
                state.backend = result.backend;
                finish_pass(
                    &mut state.diagnostics,
                    pass_id,
                    Vec::new(),
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                );
                if !state.ready_for_backend() {
                    state.backend = None;
                }
            }
            _ => {}
        }
    }
}

fn cycle_diagnostics(cycles: &[CycleReport]) -> Vec<Diagnostic> {
    cycles
        .iter()
        .filter(|c| c.class == CycleClass::IllegalInstantaneous)
        .map(|c| {
            let names: Vec<String> = c.nodes.iter().map(|n| format!("'{}'", n)).collect();
            let mut d = Diagnostic::new(
                DiagKind::IllegalInstantaneousCycle,
                format!(
                    "cycle through {} is evaluated within a single frame",
                    names.join(", ")
                ),
            )
            .with_hint("route the feedback through a block that reads the previous frame, such as Delay");
            for node in &c.nodes {
                d = d.with_node(node);
            }
            d
        })
        .collect()
}

// ── Convenience entry point ────────────────────────────────────────────────

/// Normalize `graph` end to end.
pub fn normalize(
    graph: DraftGraph,
    catalog: &BlockCatalog,
    registry: &AdapterRegistry,
    options: &NormalizeOptions,
) -> NormalizeResult {
    normalize_with(graph, catalog, registry, options, false, |_, _| {})
}

/// Normalize `graph` end to end, reporting each pass to `on_pass_complete`.
pub fn normalize_with(
    graph: DraftGraph,
    catalog: &BlockCatalog,
    registry: &AdapterRegistry,
    options: &NormalizeOptions,
    verbose: bool,
    on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> NormalizeResult {
    let mut state = NormalizeState::new(graph, catalog, registry);
    run_pipeline(&mut state, PassId::Lower, options, verbose, on_pass_complete);
    let ready_for_backend = state.ready_for_backend();
    NormalizeResult {
        graph: state.graph,
        typed: state.typed.unwrap_or_default(),
        constraints: state.constraints.unwrap_or_default(),
        diagnostics: state.diagnostics,
        cycles: state.cycles,
        iterations: state.iterations,
        inserted: state.inserted,
        cert: state.cert.unwrap_or(Cert {
            c1_edge_type_consistency: false,
            c2_fully_concrete: false,
            c3_adapter_extent_preservation: false,
        }),
        backend: state.backend,
        ready_for_backend,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;

    fn run(graph: DraftGraph) -> NormalizeResult {
        let catalog = BlockCatalog::standard().unwrap();
        let registry = AdapterRegistry::from_catalog(&catalog);
        normalize(graph, &catalog, &registry, &NormalizeOptions::default())
    }

    #[test]
    fn matching_graph_converges_in_one_iteration() {
        let graph = GraphBuilder::new()
            .node("t", "Time")
            .node("sm", "Smooth")
            .edge("e1", "t.t", "sm.x")
            .build()
            .unwrap();
        let r = run(graph);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert_eq!(r.iterations, 1);
        assert!(r.inserted.is_empty());
        assert!(r.ready_for_backend);
        assert!(r.backend.is_some());
    }

    #[test]
    fn insertion_takes_a_second_quiet_iteration() {
        let graph = GraphBuilder::new()
            .node("osc", "Phasor")
            .node("sin", "Sin")
            .edge("e1", "osc.phase", "sin.x")
            .build()
            .unwrap();
        let r = run(graph);
        assert_eq!(r.iterations, 2);
        assert_eq!(r.inserted.len(), 1);
        assert!(r.ready_for_backend, "{:?}", r.diagnostics);
    }

    #[test]
    fn failed_obligation_blocks_readiness() {
        let catalog = BlockCatalog::standard().unwrap();
        let registry = AdapterRegistry::from_catalog(&catalog);
        let graph = GraphBuilder::new()
            .node("t", "Time")
            .node("sm", "Smooth")
            .edge("e1", "t.t", "sm.x")
            .build()
            .unwrap();
        let mut state = NormalizeState::new(graph, &catalog, &registry);
        run_pipeline(&mut state, PassId::Lower, &NormalizeOptions::default(), false, |_, _| {});
        assert!(state.ready_for_backend());

        state.cert = Some(Cert {
            c1_edge_type_consistency: false,
            c2_fully_concrete: true,
            c3_adapter_extent_preservation: true,
        });
        assert!(!state.has_error());
        assert!(!state.ready_for_backend());
        state.cert = None;
        assert!(!state.ready_for_backend());
    }

    #[test]
    fn iteration_bound_is_a_hard_error() {
        let graph = GraphBuilder::new()
            .node("osc", "Phasor")
            .node("sin", "Sin")
            .edge("e1", "osc.phase", "sin.x")
            .build()
            .unwrap();
        let catalog = BlockCatalog::standard().unwrap();
        let registry = AdapterRegistry::from_catalog(&catalog);
        let options = NormalizeOptions {
            max_iterations: 1,
            ..NormalizeOptions::default()
        };
        let r = normalize(graph, &catalog, &registry, &options);
        assert!(!r.ready_for_backend);
        assert!(r.backend.is_none());
        assert!(r
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagKind::NonConvergence));
        // The rewrite that would exceed the bound is not kept.
        assert_eq!(r.graph.inserted_count(), 0);
    }

    #[test]
    fn pass_callback_sees_every_pass() {
        let graph = GraphBuilder::new().node("t", "Time").build().unwrap();
        let catalog = BlockCatalog::standard().unwrap();
        let registry = AdapterRegistry::from_catalog(&catalog);
        let mut seen = Vec::new();
        normalize_with(
            graph,
            &catalog,
            &registry,
            &NormalizeOptions::default(),
            false,
            |pass, _| seen.push(pass),
        );
        assert_eq!(seen, crate::pass::ALL_PASSES.to_vec());
    }

    #[test]
    fn extract_terminal_skips_the_loop() {
        let graph = GraphBuilder::new()
            .node("osc", "Phasor")
            .node("sin", "Sin")
            .edge("e1", "osc.phase", "sin.x")
            .build()
            .unwrap();
        let catalog = BlockCatalog::standard().unwrap();
        let registry = AdapterRegistry::from_catalog(&catalog);
        let mut state = NormalizeState::new(graph, &catalog, &registry);
        run_pipeline(
            &mut state,
            PassId::Extract,
            &NormalizeOptions::default(),
            false,
            |_, _| {},
        );
        assert_eq!(state.iterations, 1);
        assert!(state.constraints.is_some());
        assert!(state.typed.is_none());
        assert!(!state.ready_for_backend());
    }

    #[test]
    fn build_info_is_stable() {
        let graph = GraphBuilder::new().node("t", "Time").build().unwrap();
        let catalog = BlockCatalog::standard().unwrap();
        let a = compute_build_info(&graph, &catalog);
        let b = compute_build_info(&graph.clone(), &catalog);
        assert_eq!(a, b);
        assert_eq!(a.graph_hash.len(), 64);
        assert!(a.to_json().contains("\"catalog_fingerprint\""));
    }
}
