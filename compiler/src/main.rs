use clap::Parser;
use std::path::PathBuf;

use normc::adapters::AdapterRegistry;
use normc::catalog::BlockCatalog;
use normc::diag::has_errors;
use normc::graph::DraftGraph;
use normc::pass::PassId;
use normc::pipeline::{compute_build_info, run_pipeline, NormalizeOptions, NormalizeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    Typed,
    Diagnostics,
    Constraints,
    Dot,
    Backend,
    Catalog,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "normc",
    version,
    about = "Graph normalizer: resolves port types and inserts unit adapters in block dataflow graphs"
)]
struct Cli {
    /// Input draft graph (JSON)
    graph: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Block catalog file (repeatable), merged over the standard catalog
    #[arg(long = "catalog")]
    catalog: Vec<PathBuf>,

    /// Do not load the standard block catalog
    #[arg(long)]
    no_std: bool,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Typed)]
    emit: EmitStage,

    /// Fixpoint iteration bound
    #[arg(long, default_value_t = NormalizeOptions::default().max_iterations)]
    max_iterations: usize,

    /// Print normalizer phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();

    if cli.verbose {
        eprintln!("normc: graph = {}", cli.graph.display());
        eprintln!("normc: emit  = {:?}", cli.emit);
    }

    // ── Load block catalog ──
    let mut catalog = if cli.no_std {
        BlockCatalog::new()
    } else {
        match BlockCatalog::standard() {
            Ok(c) => c,
            Err(e) => {
                eprintln!("normc: error: {}", e);
                std::process::exit(2);
            }
        }
    };
    for path in &cli.catalog {
        match catalog.load_file(path) {
            Ok(n) => {
                if cli.verbose {
                    eprintln!("normc: loaded {} blocks from {}", n, path.display());
                }
            }
            Err(e) => {
                eprintln!("normc: error: {}", e);
                std::process::exit(2);
            }
        }
    }
    let registry = AdapterRegistry::from_catalog(&catalog);

    if cli.verbose {
        eprintln!(
            "normc: {} blocks registered, {} adapter rules",
            catalog.len(),
            registry.len()
        );
    }

    if cli.emit == EmitStage::Catalog {
        write_output(&cli, &catalog.pretty_json());
        return;
    }

    // ── Read draft graph ──
    let text = match std::fs::read_to_string(&cli.graph) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("normc: error: {}: {}", cli.graph.display(), e);
            std::process::exit(2);
        }
    };
    let graph: DraftGraph = match serde_json::from_str(&text) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("normc: error: {}: {}", cli.graph.display(), e);
            std::process::exit(2);
        }
    };

    if cli.verbose {
        eprintln!(
            "normc: read {} nodes, {} edges",
            graph.node_count(),
            graph.edge_count()
        );
    }

    if cli.emit == EmitStage::BuildInfo {
        write_output(&cli, &compute_build_info(&graph, &catalog).to_json());
        return;
    }

    // ── Normalize ──
    let terminal = match cli.emit {
        EmitStage::Constraints => PassId::Extract,
        _ => PassId::Lower,
    };
    let options = NormalizeOptions {
        max_iterations: cli.max_iterations.max(1),
        ..NormalizeOptions::default()
    };
    let mut state = NormalizeState::new(graph, &catalog, &registry);
    run_pipeline(&mut state, terminal, &options, cli.verbose, |_, _| {});

    if cli.emit != EmitStage::Diagnostics {
        for diag in &state.diagnostics {
            eprintln!("{}", diag);
        }
    }

    let rendered = match cli.emit {
        EmitStage::Constraints => to_json(&state.constraints),
        EmitStage::Diagnostics => to_json(&state.diagnostics),
        EmitStage::Typed => to_json(&state.typed),
        EmitStage::Backend => to_json(&state.backend),
        EmitStage::Dot => match state.typed.as_ref() {
            Some(typed) => normc::dot::emit_dot(typed, &state.cycles),
            None => String::new(),
        },
        EmitStage::Catalog | EmitStage::BuildInfo => String::new(),
    };
    write_output(&cli, &rendered);

    let blocked = match cli.emit {
        EmitStage::Constraints => has_errors(&state.diagnostics),
        _ => !state.ready_for_backend(),
    };
    if cli.verbose {
        eprintln!(
            "normc: {} iteration(s), {} adapter(s) inserted, ready_for_backend = {}",
            state.iterations,
            state.inserted.len(),
            !blocked
        );
    }
    if blocked {
        std::process::exit(1);
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_string_pretty(value) {
        Ok(mut s) => {
            s.push('\n');
            s
        }
        Err(e) => {
            eprintln!("normc: error: {}", e);
            std::process::exit(2);
        }
    }
}

fn write_output(cli: &Cli, text: &str) {
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("normc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}
