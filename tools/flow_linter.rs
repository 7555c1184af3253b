/// Flow Linter — validates an exported flow graph and its scripts.
///
/// Usage: flow_linter <flow.ron> [--variables <variables.ron>]

use narrative_flow::core::evaluator;
use narrative_flow::core::graph::FlowGraph;
use narrative_flow::core::script;
use narrative_flow::core::store::VariableStore;
use narrative_flow::schema::node::{FlowNode, NodeKind};
use rustc_hash::FxHashSet;
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: flow_linter <flow.ron> [--variables <variables.ron>]");
        process::exit(0);
    }

    let flow_path = &args[1];
    let mut variables_path = None;

    let mut i = 2;
    while i < args.len() {
        if args[i] == "--variables" && i + 1 < args.len() {
            i += 1;
            variables_path = Some(args[i].clone());
        }
        i += 1;
    }

    let graph = match FlowGraph::load_from_ron(Path::new(flow_path)) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("ERROR: Failed to load flow graph: {}", e);
            process::exit(1);
        }
    };
    println!("Loaded {} nodes", graph.len());

    let store = match variables_path {
        Some(ref path) => match VariableStore::load_from_ron(Path::new(path)) {
            Ok(store) => {
                println!("Loaded {} variables", store.len());
                Some(store)
            }
            Err(e) => {
                eprintln!("ERROR: Failed to load variables: {}", e);
                process::exit(1);
            }
        },
        None => None,
    };

    let (errors, warnings) = lint_flow(&graph, store.as_ref());

    println!("\n=== Flow Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn lint_flow(graph: &FlowGraph, store: Option<&VariableStore>) -> (Vec<String>, Vec<String>) {
    let mut errors: Vec<String> = graph.validate().iter().map(|e| e.to_string()).collect();
    let mut warnings = Vec::new();

    for connection in graph.dropped_connections() {
        warnings.push(format!(
            "Connection {} -> {} does not end on an input pin and was dropped",
            connection.source, connection.target
        ));
    }

    // Nodes nothing connects or jumps to.
    let mut entered = FxHashSet::default();
    for node in graph.nodes() {
        for pin in &node.outputs {
            for connection in &pin.connections {
                if let Ok(target) = graph.pin(connection.target) {
                    entered.insert(target.owner);
                }
            }
        }
        if let Some(target) = node.target {
            entered.insert(target.node);
        }
    }
    for node in graph.nodes() {
        if !entered.contains(&node.id) && !node.kind.is_presentable() {
            warnings.push(format!("Node {} is never entered", node.label()));
        }
        if node.kind == NodeKind::Hub && node.outputs.iter().all(|p| p.connections.is_empty()) {
            warnings.push(format!("Hub {} has no outgoing connections", node.label()));
        }
    }

    for node in graph.nodes() {
        for text in script_texts(node) {
            // Parse failures are already reported by validate().
            let Ok(parsed) = script::parse(text) else {
                continue;
            };
            for name in evaluator::unknown_functions(&parsed) {
                errors.push(format!(
                    "Node {} calls unknown function '{}'",
                    node.label(),
                    name
                ));
            }
            if let Some(store) = store {
                for name in evaluator::undeclared_variables(&parsed, store) {
                    errors.push(format!(
                        "Node {} references undeclared variable '{}'",
                        node.label(),
                        name
                    ));
                }
            }
        }
    }

    (errors, warnings)
}

fn script_texts(node: &FlowNode) -> impl Iterator<Item = &str> {
    node.expression
        .as_deref()
        .into_iter()
        .chain(
            node.inputs
                .iter()
                .chain(node.outputs.iter())
                .filter_map(|pin| pin.expression.as_deref()),
        )
}
