// End-to-end normalization scenarios.
//
// Each test builds a draft graph against the standard block catalog, runs the
// full fixpoint pipeline, and checks the typed graph, inserted adapters,
// diagnostics and backend readiness.

use std::f64::consts::FRAC_PI_2;

use normc::adapters::AdapterRegistry;
use normc::catalog::BlockCatalog;
use normc::diag::DiagKind;
use normc::graph::{CycleClass, DraftGraph, GraphBuilder, Provenance};
use normc::id::{NodeId, PortKey};
use normc::parser::parse_port_type;
use normc::pipeline::{normalize, NormalizeOptions, NormalizeResult};
use normc::types::{Axis, Cardinality};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn std_catalog() -> BlockCatalog {
    BlockCatalog::standard().expect("standard catalog loads")
}

fn run_with(graph: DraftGraph, catalog: &BlockCatalog, options: NormalizeOptions) -> NormalizeResult {
    let registry = AdapterRegistry::from_catalog(catalog);
    normalize(graph, catalog, &registry, &options)
}

fn run(graph: DraftGraph) -> NormalizeResult {
    run_with(graph, &std_catalog(), NormalizeOptions::default())
}

fn kinds(r: &NormalizeResult) -> Vec<DiagKind> {
    r.diagnostics.iter().map(|d| d.kind).collect()
}

fn phasor_to_sin() -> DraftGraph {
    GraphBuilder::new()
        .node("osc", "Phasor")
        .node("sin", "Sin")
        .edge("e1", "osc.phase", "sin.x")
        .build()
        .unwrap()
}

// ── Scenario A: phase into radians ──────────────────────────────────────────

#[test]
fn scenario_a_inserts_exactly_one_phase_adapter() {
    let r = run(phasor_to_sin());
    assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
    assert!(r.ready_for_backend);
    assert_eq!(r.inserted.len(), 1);

    let adapter = &r.inserted[0];
    assert_eq!(adapter.rule, "PhaseToRadians");
    assert_eq!(adapter.replaced_edge.as_str(), "e1");
    assert!(adapter.node.as_str().starts_with("adapter.PhaseToRadians."));

    // The authored edge is gone; two derived edges replace it.
    assert!(r.graph.edge(&normc::id::EdgeId::new("e1")).is_none());
    assert_eq!(r.graph.edge_count(), 2);
    assert_eq!(r.graph.inserted_count(), 1);

    let node = r.graph.node(&adapter.node).unwrap();
    assert_eq!(
        node.provenance,
        Provenance::Inserted {
            rule: "PhaseToRadians".into(),
            replaced_edge: normc::id::EdgeId::new("e1"),
        }
    );
}

#[test]
fn scenario_a_adapter_maps_quarter_phase_to_half_pi() {
    let r = run(phasor_to_sin());
    let backend = r.backend.expect("ready graph lowers");
    let kernel = backend
        .nodes
        .iter()
        .find_map(|n| n.kernel)
        .expect("adapter node carries its kernel");
    assert!((kernel.eval(0.25) - FRAC_PI_2).abs() < 1e-12);
}

#[test]
fn scenario_a_typed_edges_are_concrete_on_both_sides() {
    let r = run(phasor_to_sin());
    let labels: Vec<String> = r
        .typed
        .edges
        .values()
        .map(|e| e.ty.as_ref().unwrap().to_string())
        .collect();
    assert_eq!(labels.len(), 2);
    assert!(labels.contains(&"float:phase01".to_string()));
    assert!(labels.contains(&"float:radians".to_string()));
    let sin_y = r.typed.port_type(&PortKey::new("sin", "y")).unwrap();
    assert_eq!(sin_y.cardinality, Axis::Inst(Cardinality::One));
}

// ── Scenario B: no conversion path ──────────────────────────────────────────

#[test]
fn scenario_b_phase_to_norm01_blocks_the_backend() {
    let graph = GraphBuilder::new()
        .node("osc", "Phasor")
        .node("out", "Output")
        .override_port("out", "value", parse_port_type("float:norm01").unwrap())
        .edge("e1", "osc.phase", "out.value")
        .build()
        .unwrap();
    let r = run(graph);
    assert_eq!(kinds(&r), vec![DiagKind::NoConversionPath]);
    assert!(!r.ready_for_backend);
    assert!(r.backend.is_none());
    assert!(r.inserted.is_empty());

    let rendered = r.diagnostics[0].to_string();
    insta::assert_snapshot!(rendered, @r"
    error[E0200]: no adapter converts float:phase01 to float:norm01 on edge 'e1' ('osc.phase' -> 'out.value')
      hint: register an adapter block for this conversion or change one endpoint
    ");
}

// ── Scenario C: independent adapters ────────────────────────────────────────

#[test]
fn scenario_c_two_adapters_get_distinct_ids() {
    let graph = GraphBuilder::new()
        .node("osc", "Phasor")
        .node("sin", "Sin")
        .node("c", "Counter")
        .node("mul", "Multiply")
        .edge("e1", "osc.phase", "sin.x")
        .edge("e2", "c.n", "mul.b")
        .edge("e3", "sin.y", "mul.a")
        .build()
        .unwrap();
    let r = run(graph);
    assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
    assert!(r.ready_for_backend);
    assert_eq!(r.iterations, 2);

    let mut rules: Vec<&str> = r.inserted.iter().map(|a| a.rule.as_str()).collect();
    rules.sort();
    assert_eq!(rules, vec!["CountToFloat", "PhaseToRadians"]);
    assert_ne!(r.inserted[0].node, r.inserted[1].node);
    assert_eq!(r.typed.adapters().count(), 2);
}

// ── Graph-level properties ──────────────────────────────────────────────────

#[test]
fn matching_types_leave_the_graph_untouched() {
    let graph = GraphBuilder::new()
        .node("t", "Time")
        .node("sm", "Smooth")
        .node("out", "Output")
        .edge("e1", "t.t", "sm.x")
        .edge("e2", "sm.y", "out.value")
        .build()
        .unwrap();
    let r = run(graph.clone());
    assert!(r.ready_for_backend, "{:?}", r.diagnostics);
    assert_eq!(r.graph, graph);
    assert_eq!(r.iterations, 1);
}

#[test]
fn normalizing_twice_changes_nothing() {
    let first = run(phasor_to_sin());
    let second = run(first.graph.clone());
    assert!(second.inserted.is_empty());
    assert_eq!(second.iterations, 1);
    assert_eq!(second.graph, first.graph);
    assert_eq!(second.typed, first.typed);
    assert!(second.ready_for_backend);
}

#[test]
fn construction_order_does_not_change_output() {
    let a = GraphBuilder::new()
        .node("osc", "Phasor")
        .node("sin", "Sin")
        .node("t", "Time")
        .node("sm", "Smooth")
        .edge("e1", "osc.phase", "sin.x")
        .edge("e2", "t.t", "sm.x")
        .build()
        .unwrap();
    let b = GraphBuilder::new()
        .node("sm", "Smooth")
        .node("t", "Time")
        .node("sin", "Sin")
        .node("osc", "Phasor")
        .edge("e2", "t.t", "sm.x")
        .edge("e1", "osc.phase", "sin.x")
        .build()
        .unwrap();
    let ra = run(a);
    let rb = run(b);
    assert_eq!(
        serde_json::to_string(&ra.typed).unwrap(),
        serde_json::to_string(&rb.typed).unwrap()
    );
    assert_eq!(ra.graph.canonical_json(), rb.graph.canonical_json());
}

#[test]
fn ambiguous_conversions_are_reported_not_chosen() {
    let mut catalog = std_catalog();
    catalog
        .load_json_str(
            r#"{"blocks":[{
                "name":"PhaseToRadiansFast",
                "inputs":[{"name":"in","type":"float:phase01@?C"}],
                "outputs":[{"name":"out","type":"float:radians@?C"}],
                "adapter":{"cost":0,"kernel":{"op":"scale","factor":6.283185307179586}}
            }]}"#,
            "test",
        )
        .unwrap();
    let r = run_with(phasor_to_sin(), &catalog, NormalizeOptions::default());
    assert_eq!(kinds(&r), vec![DiagKind::AmbiguousAdapter]);
    assert!(r.inserted.is_empty());
    assert!(!r.ready_for_backend);

    let rendered = r.diagnostics[0].to_string();
    insta::assert_snapshot!(rendered, @r"
    error[E0201]: 2 adapters convert float:phase01 to float:radians on edge 'e1': PhaseToRadians, PhaseToRadiansFast
      hint: insert the intended adapter block explicitly
    ");
}

#[test]
fn open_broadcast_member_follows_many_input() {
    let graph = GraphBuilder::new()
        .node("g", "Grid")
        .node("add", "Add")
        .edge("e1", "g.index", "add.a")
        .build()
        .unwrap();
    let r = run(graph);
    assert!(r.ready_for_backend, "{:?}", r.diagnostics);
    let card = |port: &str| {
        r.typed
            .port_type(&PortKey::new("add", port))
            .unwrap()
            .cardinality
            .clone()
    };
    assert_eq!(card("a"), Axis::Inst(Cardinality::many("grid")));
    assert_eq!(card("b"), Axis::Inst(Cardinality::many("grid")));
    assert_eq!(card("out"), Axis::Inst(Cardinality::many("grid")));
}

#[test]
fn mixed_instance_domains_conflict() {
    let graph = GraphBuilder::new()
        .node("g", "Grid")
        .node("p", "Particles")
        .node("add", "Add")
        .edge("e1", "g.index", "add.a")
        .edge("e2", "p.t", "add.b")
        .build()
        .unwrap();
    let r = run(graph);
    assert!(kinds(&r).contains(&DiagKind::CardinalityConflict));
    assert!(!r.ready_for_backend);
}

// ── Cycles ──────────────────────────────────────────────────────────────────

#[test]
fn delayed_feedback_is_legal() {
    let graph = GraphBuilder::new()
        .node("t", "Time")
        .node("add", "Add")
        .node("d", "Delay")
        .edge("e1", "t.t", "add.a")
        .edge("e2", "add.out", "d.in")
        .edge("e3", "d.out", "add.b")
        .build()
        .unwrap();
    let r = run(graph);
    assert!(r.ready_for_backend, "{:?}", r.diagnostics);
    assert_eq!(r.cycles.len(), 1);
    assert_eq!(r.cycles[0].class, CycleClass::LegalFeedback);
    assert_eq!(
        r.cycles[0].nodes,
        vec![NodeId::new("add"), NodeId::new("d")]
    );
}

#[test]
fn instantaneous_feedback_blocks_the_backend() {
    let graph = GraphBuilder::new()
        .node("t", "Time")
        .node("add", "Add")
        .node("sm", "Smooth")
        .edge("e1", "t.t", "add.a")
        .edge("e2", "add.out", "sm.x")
        .edge("e3", "sm.y", "add.b")
        .build()
        .unwrap();
    let r = run(graph);
    assert_eq!(kinds(&r), vec![DiagKind::IllegalInstantaneousCycle]);
    assert!(!r.ready_for_backend);
    assert_eq!(r.cycles[0].class, CycleClass::IllegalInstantaneous);

    let rendered = r.diagnostics[0].to_string();
    insta::assert_snapshot!(rendered, @r"
    error[E0300]: cycle through 'add', 'sm' is evaluated within a single frame
      hint: route the feedback through a block that reads the previous frame, such as Delay
    ");
}

#[test]
fn cycle_classification_can_be_disabled() {
    let graph = GraphBuilder::new()
        .node("add", "Add")
        .node("sm", "Smooth")
        .node("t", "Time")
        .edge("e1", "t.t", "add.a")
        .edge("e2", "add.out", "sm.x")
        .edge("e3", "sm.y", "add.b")
        .build()
        .unwrap();
    let options = NormalizeOptions {
        classify_cycles: false,
        ..NormalizeOptions::default()
    };
    let r = run_with(graph, &std_catalog(), options);
    assert!(r.cycles.is_empty());
    assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
}

// ── Failure reporting ───────────────────────────────────────────────────────

#[test]
fn iteration_bound_is_reported() {
    let options = NormalizeOptions {
        max_iterations: 1,
        ..NormalizeOptions::default()
    };
    let r = run_with(phasor_to_sin(), &std_catalog(), options);
    assert!(kinds(&r).contains(&DiagKind::NonConvergence));
    assert!(!r.ready_for_backend);
}

#[test]
fn unknown_block_is_reported_with_its_node() {
    let graph = GraphBuilder::new()
        .node("x", "NoSuchBlock")
        .node("t", "Time")
        .build()
        .unwrap();
    let r = run(graph);
    assert_eq!(kinds(&r), vec![DiagKind::UnknownBlockType]);
    assert!(!r.ready_for_backend);
    assert!(r.backend.is_none());
}

#[test]
fn unresolved_polymorphic_chain_is_not_ready() {
    let graph = GraphBuilder::new()
        .node("a", "Smooth")
        .node("b", "Smooth")
        .edge("e1", "a.y", "b.x")
        .build()
        .unwrap();
    let r = run(graph);
    let k = kinds(&r);
    assert!(k.contains(&DiagKind::UnresolvedPayload));
    assert!(k.contains(&DiagKind::UnresolvedUnit));
    assert!(k.contains(&DiagKind::UnresolvedCardinality));
    assert!(!r.typed.is_fully_concrete());
    assert!(!r.cert.c2_fully_concrete);
}
