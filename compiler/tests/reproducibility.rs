// Reproducibility tests for the normc binary.
//
// These tests verify that the CLI produces byte-identical outputs for
// identical inputs and reports readiness through its exit code.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn normc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_normc"))
}

fn fixture(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
        .to_str()
        .unwrap()
        .to_string()
}

fn run_normc(args: &[&str]) -> Output {
    Command::new(normc_binary())
        .args(args)
        .output()
        .expect("failed to run normc")
}

fn run_ok(args: &[&str]) -> String {
    let output = run_normc(args);
    assert!(
        output.status.success(),
        "normc failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("non-UTF8 output")
}

/// Normalizing the same graph twice produces byte-identical typed JSON.
#[test]
fn same_graph_identical_typed_output() {
    let graph = fixture("phasor_sin.json");
    let first = run_ok(&["--emit", "typed", &graph]);
    let second = run_ok(&["--emit", "typed", &graph]);
    assert_eq!(first, second, "typed output should be byte-identical across runs");
    assert!(first.contains("adapter.PhaseToRadians."));
    assert!(first.contains("adapter.CountToFloat."));
}

#[test]
fn same_graph_identical_backend_output() {
    let graph = fixture("phasor_sin.json");
    let first = run_ok(&["--emit", "backend", &graph]);
    let second = run_ok(&["--emit", "backend", &graph]);
    assert_eq!(first, second);
    assert!(!first.contains("provenance"), "backend must not carry provenance");
}

#[test]
fn same_graph_identical_dot_output() {
    let graph = fixture("phasor_sin.json");
    let first = run_ok(&["--emit", "dot", &graph]);
    let second = run_ok(&["--emit", "dot", &graph]);
    assert_eq!(first, second);
    assert!(first.starts_with("digraph normc {"));
}

#[test]
fn build_info_is_stable_and_well_formed() {
    let graph = fixture("phasor_sin.json");
    let first = run_ok(&["--emit", "build-info", &graph]);
    let second = run_ok(&["--emit", "build-info", &graph]);
    assert_eq!(first, second);
    let value: serde_json::Value = serde_json::from_str(&first).unwrap();
    assert_eq!(value["graph_hash"].as_str().unwrap().len(), 64);
    assert_eq!(value["catalog_fingerprint"].as_str().unwrap().len(), 64);
}

#[test]
fn extra_catalog_changes_the_fingerprint() {
    let graph = fixture("phasor_sin.json");
    let base = run_ok(&["--emit", "build-info", &graph]);
    let extended = run_ok(&[
        "--emit",
        "build-info",
        "--catalog",
        &fixture("ambiguous_catalog.json"),
        &graph,
    ]);
    let a: serde_json::Value = serde_json::from_str(&base).unwrap();
    let b: serde_json::Value = serde_json::from_str(&extended).unwrap();
    assert_eq!(a["graph_hash"], b["graph_hash"]);
    assert_ne!(a["catalog_fingerprint"], b["catalog_fingerprint"]);
}

#[test]
fn blocked_graph_exits_with_one() {
    let output = run_normc(&["--emit", "diagnostics", &fixture("no_path.json")]);
    assert_eq!(output.status.code(), Some(1));
    let diags: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(diags[0]["code"], "E0200");
    assert_eq!(diags[0]["targets"][0]["kind"], "edge");
}

#[test]
fn ambiguous_catalog_blocks_the_graph() {
    let output = run_normc(&[
        "--emit",
        "diagnostics",
        "--catalog",
        &fixture("ambiguous_catalog.json"),
        &fixture("phasor_sin.json"),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("E0201"), "{stdout}");
}

#[test]
fn missing_input_exits_with_two() {
    let output = run_normc(&["--emit", "typed", "does/not/exist.json"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn catalog_emit_lists_standard_blocks() {
    let out = run_ok(&["--emit", "catalog", &fixture("phasor_sin.json")]);
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    let names: Vec<&str> = value["blocks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"PhaseToRadians"));
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}
