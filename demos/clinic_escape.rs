/// Clinic Escape example — walks the bundled clinic flow with a scripted player.
///
/// Wakes up, peeks at the door before and after a "what if" speculation,
/// searches the drawer, then escapes.
///
/// Run with: cargo run --example clinic_escape

use narrative_flow::core::player::FlowPlayer;
use narrative_flow::core::state::FlowState;
use narrative_flow::core::store::{StoreView, VariableStore};
use narrative_flow::schema::branch::BranchSet;
use narrative_flow::schema::node::NodeId;
use narrative_flow::schema::variable::GvName;
use std::path::Path;

const DOOR: NodeId = NodeId(0x300);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("narrative_flow=info")
        .init();

    // --- Load the clinic sample ---
    let mut player = FlowPlayer::builder()
        .graph_path("flow_data/clinic/flow.ron")
        .config_path("flow_data/clinic/player.ron")
        .start_on(NodeId(0x100))
        .build()
        .expect("Failed to build player");

    let store = VariableStore::load_from_ron(Path::new("flow_data/clinic/variables.ron"))
        .expect("Failed to load clinic variables");
    let mut state = player.new_state(store);

    narrate(&player);
    let choices = player.branches(&mut state).expect("branches");
    print_choices(&player, &choices);

    // --- What would the door do right now? ---
    let door = player.peek(&mut state, DOOR).expect("peek");
    println!("(peek) the door leads to {:?}", door.targets());

    // --- Speculate: search the drawer, look at the door, then forget it ---
    player.begin_speculation(&mut state);
    player.play(&mut state, 0).expect("search drawer");
    let door = player.peek(&mut state, DOOR).expect("peek");
    println!("(what if) after searching, the door leads to {:?}", door.targets());
    player
        .discard_speculation(&mut state)
        .expect("discard speculation");
    print_var(&state, "Inventory.keycard");

    // --- Play for real ---
    let script = [0, 0, 0, 0];
    for choice in script {
        let branch = player.play(&mut state, choice).expect("play");
        println!("--> took branch {} to {}", branch.index, branch.target);
        narrate(&player);
        let next = player.branches(&mut state).expect("branches");
        if next.is_empty() {
            break;
        }
        print_choices(&player, &next);
    }

    println!("=== Final state ===");
    for (name, value) in state.variables().entries() {
        println!("  {} = {}", name, value);
    }
    println!(
        "  hub visited {} times",
        state.seen_counter(NodeId(0x120))
    );
}

fn narrate(player: &FlowPlayer) {
    let Some(cursor) = player.cursor() else {
        return;
    };
    if let Ok(node) = player.graph().node(cursor) {
        if let Some(text) = node.text() {
            println!("{}", text);
        }
        if let Some(directions) = node.stage_directions() {
            println!("  ({})", directions);
        }
        if node.text().is_none() {
            println!("[{}]", node.label());
        }
    }
}

fn print_choices(player: &FlowPlayer, set: &BranchSet) {
    for branch in set.iter() {
        let label = player
            .graph()
            .node(branch.target)
            .ok()
            .and_then(|node| node.menu_text())
            .unwrap_or("...");
        println!("  {}) {}", branch.index, label);
    }
}

fn print_var(state: &FlowState, name: &str) {
    if let Some(name) = GvName::parse(name) {
        if let Ok(value) = state.value(&name) {
            println!("  {} = {}", name, value);
        }
    }
}
