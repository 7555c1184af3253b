/// Preview — interactive shell for walking a flow graph.
///
/// Usage: flow_preview --graph <flow.ron> [--variables <path>] [--config <path>]
///                     [--start <node>] [--seed <n>]
///
/// Commands:
///   branches              — list branches from the cursor
///   play <n>              — take branch n
///   peek <node>           — list branches from any node without moving
///   goto <node>           — move the cursor
///   vars                  — print all variables
///   set <Ns.Var> <value>  — write a variable
///   seen <node>           — print a node's seen counter
///   speculate             — open a speculation layer
///   commit / discard      — release the innermost speculation layer
///   help                  — list commands
///   quit                  — exit

use narrative_flow::core::player::FlowPlayer;
use narrative_flow::core::state::FlowState;
use narrative_flow::core::store::{StoreView, VariableStore};
use narrative_flow::schema::branch::{BranchSet, SkipReason};
use narrative_flow::schema::node::NodeId;
use narrative_flow::schema::variable::{GvName, Value};
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let mut graph_path = None;
    let mut variables_path = None;
    let mut config_path = None;
    let mut start = None;
    let mut seed = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--graph" if i + 1 < args.len() => {
                i += 1;
                graph_path = Some(args[i].clone());
            }
            "--variables" if i + 1 < args.len() => {
                i += 1;
                variables_path = Some(args[i].clone());
            }
            "--config" if i + 1 < args.len() => {
                i += 1;
                config_path = Some(args[i].clone());
            }
            "--start" if i + 1 < args.len() => {
                i += 1;
                start = NodeId::parse(&args[i]);
                if start.is_none() {
                    eprintln!("Bad node id: {}", args[i]);
                    std::process::exit(1);
                }
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse().ok();
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(graph_path) = graph_path else {
        eprintln!("--graph is required");
        print_usage();
        std::process::exit(1);
    };

    let mut builder = FlowPlayer::builder().graph_path(graph_path);
    if let Some(path) = config_path {
        builder = builder.config_path(path);
    }
    if let Some(seed) = seed {
        builder = builder.seed(seed);
    }
    let mut player = match builder.build() {
        Ok(player) => player,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let store = match variables_path {
        Some(ref path) => match VariableStore::load_from_ron(Path::new(path)) {
            Ok(store) => store,
            Err(e) => {
                eprintln!("ERROR: Failed to load variables: {}", e);
                std::process::exit(1);
            }
        },
        None => VariableStore::new(),
    };
    let mut state = player.new_state(store);

    // Default to the first node in the export.
    let start = start.or_else(|| player.graph().nodes().first().map(|n| n.id));
    if let Some(start) = start {
        if let Err(e) = player.set_cursor(start) {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    }

    println!("Loaded {} nodes, {} variables", player.graph().len(), state.variables().len());
    println!("Seed: {}", player.config().seed);
    println!("Type 'help' for commands.\n");
    show_cursor(&player);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("flow> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts[0].to_lowercase();

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => {
                print_help();
            }
            "branches" | "b" => match player.branches(&mut state) {
                Ok(set) => print_branches(&player, &set),
                Err(e) => println!("ERROR: {}", e),
            },
            "play" | "p" => {
                let Some(index) = parts.get(1).and_then(|s| s.parse::<usize>().ok()) else {
                    println!("Usage: play <n>");
                    continue;
                };
                match player.play(&mut state, index) {
                    Ok(_) => show_cursor(&player),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "peek" => {
                let Some(node) = parts.get(1).and_then(|s| NodeId::parse(s)) else {
                    println!("Usage: peek <node>");
                    continue;
                };
                match player.peek(&mut state, node) {
                    Ok(set) => print_branches(&player, &set),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "goto" => {
                let Some(node) = parts.get(1).and_then(|s| NodeId::parse(s)) else {
                    println!("Usage: goto <node>");
                    continue;
                };
                match player.set_cursor(node) {
                    Ok(()) => show_cursor(&player),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "vars" | "v" => {
                for (name, value) in state.variables().entries() {
                    println!("  {} = {}", name, value);
                }
            }
            "set" => {
                if parts.len() < 3 {
                    println!("Usage: set <Namespace.Variable> <value>");
                    continue;
                }
                match set_variable(&mut state, parts[1], &parts[2..].join(" ")) {
                    Ok(value) => println!("  {} = {}", parts[1], value),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "seen" => {
                let Some(node) = parts.get(1).and_then(|s| NodeId::parse(s)) else {
                    println!("Usage: seen <node>");
                    continue;
                };
                println!("  {} seen {} times", node, state.seen_counter(node));
            }
            "speculate" => {
                let token = player.begin_speculation(&mut state);
                println!("Speculation {} open (depth {})", token, player.speculation_depth());
            }
            "commit" => match player.commit_speculation(&mut state) {
                Ok(()) => println!("Committed (depth {})", player.speculation_depth()),
                Err(e) => println!("ERROR: {}", e),
            },
            "discard" => match player.discard_speculation(&mut state) {
                Ok(()) => {
                    println!("Discarded (depth {})", player.speculation_depth());
                    show_cursor(&player);
                }
                Err(e) => println!("ERROR: {}", e),
            },
            _ => {
                println!("Unknown command: {}. Type 'help' for commands.", cmd);
            }
        }
    }
}

fn set_variable(state: &mut FlowState, name: &str, text: &str) -> Result<Value, String> {
    let name = GvName::parse(name).ok_or_else(|| format!("bad variable name '{}'", name))?;
    let kind = state.value(&name).map_err(|e| e.to_string())?.kind();
    let text = text.trim_matches('"');
    let value = Value::parse_as(kind, text)
        .ok_or_else(|| format!("'{}' is not a valid {}", text, kind))?;
    state
        .set_value(&name, value.clone())
        .map_err(|e| e.to_string())?;
    Ok(value)
}

fn show_cursor(player: &FlowPlayer) {
    let Some(cursor) = player.cursor() else {
        println!("(no cursor)");
        return;
    };
    let Ok(node) = player.graph().node(cursor) else {
        return;
    };
    println!("\n[{}] {} ({})", node.id, node.label(), node.kind.name());
    if let Some(text) = node.text() {
        println!("  {}", text);
    }
    if let Some(directions) = node.stage_directions() {
        println!("  ({})", directions);
    }
    println!();
}

fn print_branches(player: &FlowPlayer, set: &BranchSet) {
    if set.is_empty() {
        println!("  (no branches)");
    }
    for branch in set.iter() {
        let label = player
            .graph()
            .node(branch.target)
            .map(|node| node.menu_text().map(str::to_string).unwrap_or_else(|| node.label()))
            .unwrap_or_else(|_| branch.target.to_string());
        let marker = if branch.is_valid { "" } else { " [invalid]" };
        println!("  {}: {} -> {}{}", branch.index, label, branch.target, marker);
    }
    for skipped in &set.skipped {
        let reason = match &skipped.reason {
            SkipReason::Dangling { source, target } => {
                format!("connection {} -> {} is dangling", source, target)
            }
            SkipReason::DanglingTarget { jump, target } => {
                format!("jump {} targets missing node {}", jump, target)
            }
            SkipReason::Malformed { node, reason } => format!("node {}: {}", node, reason),
            SkipReason::DepthLimit { node, depth } => {
                format!("depth limit {} reached at {}", depth, node)
            }
        };
        println!("  skipped: {}", reason);
    }
}

fn print_usage() {
    println!("Usage: flow_preview --graph <flow.ron> [--variables <path>] [--config <path>]");
    println!("                    [--start <node>] [--seed <n>]");
}

fn print_help() {
    println!("Commands:");
    println!("  branches              List branches from the cursor");
    println!("  play <n>              Take branch n");
    println!("  peek <node>           List branches from any node without moving");
    println!("  goto <node>           Move the cursor");
    println!("  vars                  Print all variables");
    println!("  set <Ns.Var> <value>  Write a variable");
    println!("  seen <node>           Print a node's seen counter");
    println!("  speculate             Open a speculation layer");
    println!("  commit                Keep the innermost speculation layer");
    println!("  discard               Drop the innermost speculation layer");
    println!("  help                  Show this help");
    println!("  quit                  Exit");
    println!();
    println!("Node ids may be decimal or 0x-prefixed hex.");
}
