/// Player integration tests — lookahead, advancement, and pruning.

use narrative_flow::core::graph::FlowGraph;
use narrative_flow::core::player::{FlowError, FlowPlayer};
use narrative_flow::core::state::FlowState;
use narrative_flow::core::store::{StoreView, VariableStore};
use narrative_flow::schema::branch::SkipReason;
use narrative_flow::schema::node::{NodeId, NodeKind, PinId};
use narrative_flow::schema::variable::{GvName, Value};
use std::cell::RefCell;
use std::rc::Rc;

fn quest_store() -> VariableStore {
    let mut store = VariableStore::new();
    store
        .declare(&GvName::new("Quest", "Started"), Value::Bool(false))
        .unwrap();
    store
}

fn started(state: &FlowState) -> Value {
    state.value(&GvName::new("Quest", "Started")).unwrap().clone()
}

fn player_for(graph: &str, start: u64) -> (FlowPlayer, FlowState) {
    let player = FlowPlayer::builder()
        .with_graph(FlowGraph::parse_ron(graph).unwrap())
        .start_on(NodeId(start))
        .build()
        .unwrap();
    let state = player.new_state(quest_store());
    (player, state)
}

/// D0 -> Instruction(Quest.Started = true) -> D1 -> Condition(Quest.Started == true) -> DT | DF
const QUEST: &str = r#"[
    (id: 1, kind: Dialogue, outputs: [(id: 10, connections: [20])]),
    (id: 2, kind: Instruction, expression: "Quest.Started = true",
     inputs: [(id: 20)], outputs: [(id: 21, connections: [30])]),
    (id: 3, kind: Dialogue, inputs: [(id: 30)], outputs: [(id: 31, connections: [40])]),
    (id: 4, kind: Condition, expression: "Quest.Started == true",
     inputs: [(id: 40)],
     outputs: [(id: 41, connections: [50]), (id: 42, connections: [60])]),
    (id: 5, kind: Dialogue, features: [Text("It's on.")], inputs: [(id: 50)]),
    (id: 6, kind: Dialogue, features: [Text("Not yet.")], inputs: [(id: 60)]),
]"#;

#[test]
fn peek_is_side_effect_free_until_advance() {
    let (mut player, mut state) = player_for(QUEST, 1);

    // Before the instruction has really run, D1 leads to the false branch.
    let from_d1 = player.peek(&mut state, NodeId(3)).unwrap();
    assert_eq!(from_d1.targets(), vec![NodeId(6)]);

    // Looking ahead through the instruction does not write the store.
    let from_d0 = player.peek(&mut state, NodeId(1)).unwrap();
    assert_eq!(from_d0.targets(), vec![NodeId(3)]);
    assert_eq!(started(&state), Value::Bool(false));

    player.advance(&mut state, &from_d0.branches[0]).unwrap();
    assert_eq!(player.cursor(), Some(NodeId(3)));
    assert_eq!(started(&state), Value::Bool(true));
    assert_eq!(state.shadow_level(), 0);

    let from_d1 = player.peek(&mut state, NodeId(3)).unwrap();
    assert_eq!(from_d1.targets(), vec![NodeId(5)]);
}

#[test]
fn peek_is_idempotent() {
    let (player, mut state) = player_for(QUEST, 1);
    let before = state.committed_variables().clone();
    let first = player.peek(&mut state, NodeId(1)).unwrap();
    let second = player.peek(&mut state, NodeId(1)).unwrap();
    assert_eq!(first, second);
    assert_eq!(state.committed_variables(), &before);
    assert_eq!(state.committed_variables().to_ron().unwrap(), before.to_ron().unwrap());
    assert!(state.committed_seen().is_empty());
}

#[test]
fn branches_follow_output_pin_order() {
    let graph = r#"[
        (id: 1, kind: Hub, outputs: [
            (id: 11, expression: "Quest.Started == true", connections: [21]),
            (id: 12, expression: "Quest.Started == false", connections: [31]),
            (id: 13, connections: [41]),
        ]),
        (id: 2, kind: Dialogue, inputs: [(id: 21)]),
        (id: 3, kind: Dialogue, inputs: [(id: 31)]),
        (id: 4, kind: Dialogue, inputs: [(id: 41)]),
    ]"#;
    let (player, mut state) = player_for(graph, 1);
    let set = player.branches(&mut state).unwrap();
    assert_eq!(set.targets(), vec![NodeId(3), NodeId(4)]);
    assert_eq!(set.branches[0].index, 0);
    assert_eq!(set.branches[1].index, 1);

    let all = FlowPlayer::builder()
        .with_graph(player.graph().clone())
        .ignore_invalid_branches(false)
        .build()
        .unwrap()
        .get_valid_branches(&mut state, NodeId(1))
        .unwrap();
    assert_eq!(all.targets(), vec![NodeId(2), NodeId(3), NodeId(4)]);
    assert!(!all.branches[0].is_valid);
}

#[test]
fn jump_cycle_terminates() {
    let graph = r#"[
        (id: 1, kind: Jump, inputs: [(id: 10)], target: Some((node: 2))),
        (id: 2, kind: Jump, inputs: [(id: 20)], target: Some((node: 1, pin: Some(10)))),
    ]"#;
    let (player, mut state) = player_for(graph, 1);
    let set = player.branches(&mut state).unwrap();
    assert!(set.is_empty());
    assert!(set.skipped.is_empty());
}

#[test]
fn hub_cycle_is_pruned_but_exit_is_found() {
    let graph = r#"[
        (id: 1, kind: Dialogue, outputs: [(id: 10, connections: [20])]),
        (id: 2, kind: Hub, inputs: [(id: 20)], outputs: [(id: 21, connections: [30, 40])]),
        (id: 3, kind: Hub, inputs: [(id: 30)], outputs: [(id: 31, connections: [20])]),
        (id: 4, kind: Dialogue, inputs: [(id: 40)]),
    ]"#;
    let (player, mut state) = player_for(graph, 1);
    assert_eq!(player.branches(&mut state).unwrap().targets(), vec![NodeId(4)]);
}

#[test]
fn pausable_stop_may_loop_back_to_origin() {
    let graph = r#"[
        (id: 1, kind: Dialogue, inputs: [(id: 9)], outputs: [(id: 10, connections: [20])]),
        (id: 2, kind: Hub, inputs: [(id: 20)], outputs: [(id: 21, connections: [9])]),
    ]"#;
    let (mut player, mut state) = player_for(graph, 1);
    let branch = player.play(&mut state, 0).unwrap();
    assert_eq!(branch.target, NodeId(1));
    assert_eq!(player.cursor(), Some(NodeId(1)));
}

#[test]
fn dangling_references_are_pruned_and_reported() {
    let graph = r#"[
        (id: 1, kind: Hub, outputs: [(id: 10, connections: [20, 30]), (id: 11, connections: [40])]),
        (id: 2, kind: Dialogue, inputs: [(id: 20)]),
        (id: 3, kind: Dialogue, inputs: [(id: 30)]),
        (id: 4, kind: Jump, inputs: [(id: 40)], target: Some((node: 3))),
    ]"#;
    let (mut player, mut state) = player_for(graph, 1);
    assert_eq!(
        player.branches(&mut state).unwrap().targets(),
        vec![NodeId(2), NodeId(3), NodeId(3)]
    );

    // Live edit: remove a node others still point at.
    player.graph_mut().remove_node(NodeId(3)).unwrap();
    let set = player.branches(&mut state).unwrap();
    assert_eq!(set.targets(), vec![NodeId(2)]);
    assert_eq!(set.skipped.len(), 2);
    assert_eq!(
        set.skipped[0].reason,
        SkipReason::Dangling {
            source: PinId(10),
            target: PinId(30),
        }
    );
    assert_eq!(
        set.skipped[1].reason,
        SkipReason::DanglingTarget {
            jump: NodeId(4),
            target: NodeId(3),
        }
    );
    assert_eq!(state.shadow_level(), 0);
}

#[test]
fn script_error_aborts_and_leaves_no_layer() {
    let graph = r#"[
        (id: 1, kind: Hub, outputs: [(id: 10, connections: [20, 30])]),
        (id: 2, kind: Dialogue, inputs: [(id: 20)]),
        (id: 3, kind: Instruction, expression: "Quest.Started = true; Quest.Nope = 1",
         inputs: [(id: 30)], outputs: [(id: 31)]),
    ]"#;
    let (player, mut state) = player_for(graph, 1);
    let before = state.committed_variables().clone();
    assert!(matches!(
        player.peek(&mut state, NodeId(1)),
        Err(FlowError::Script(_))
    ));
    assert_eq!(state.shadow_level(), 0);
    assert_eq!(state.committed_variables(), &before);
}

#[test]
fn advance_rejects_branch_whose_guard_no_longer_holds() {
    let graph = r#"[
        (id: 1, kind: Dialogue, outputs: [(id: 10, expression: "Quest.Started == false", connections: [20])]),
        (id: 2, kind: Dialogue, inputs: [(id: 20)]),
    ]"#;
    let (mut player, mut state) = player_for(graph, 1);
    let set = player.branches(&mut state).unwrap();

    state
        .variables_mut()
        .unwrap()
        .set(&GvName::new("Quest", "Started"), Value::Bool(true))
        .unwrap();
    assert!(matches!(
        player.advance(&mut state, &set.branches[0]),
        Err(FlowError::StaleBranch { .. })
    ));
    assert_eq!(player.cursor(), Some(NodeId(1)));
    assert_eq!(state.shadow_level(), 0);
}

#[test]
fn advance_through_single_output_condition() {
    let graph = r#"[
        (id: 1, kind: Dialogue, outputs: [(id: 10, connections: [20])]),
        (id: 2, kind: Condition, expression: "Quest.Started", inputs: [(id: 20)],
         outputs: [(id: 21, connections: [30])]),
        (id: 3, kind: Dialogue, inputs: [(id: 30)]),
    ]"#;
    let (mut player, mut state) = player_for(graph, 1);
    let branch = player.play(&mut state, 0).unwrap();
    assert_eq!(branch.target, NodeId(3));
    assert_eq!(player.cursor(), Some(NodeId(3)));
}

#[test]
fn nested_speculation_sessions() {
    let (mut player, mut state) = player_for(QUEST, 1);

    player.begin_speculation(&mut state);
    player.play(&mut state, 0).unwrap();
    player.begin_speculation(&mut state);
    let branch = player.play(&mut state, 0).unwrap();
    assert_eq!(branch.target, NodeId(5));
    assert_eq!(player.speculation_depth(), 2);

    player.discard_speculation(&mut state).unwrap();
    assert_eq!(player.cursor(), Some(NodeId(3)));
    assert_eq!(started(&state), Value::Bool(true));

    player.discard_speculation(&mut state).unwrap();
    assert_eq!(player.cursor(), Some(NodeId(1)));
    assert_eq!(started(&state), Value::Bool(false));
    assert!(matches!(
        player.discard_speculation(&mut state),
        Err(FlowError::NoSpeculation)
    ));
}

#[test]
fn pause_on_is_configurable() {
    let graph = r#"[
        (id: 1, kind: Dialogue, outputs: [(id: 10, connections: [20])]),
        (id: 2, kind: Hub, inputs: [(id: 20)], outputs: [(id: 21, connections: [30])]),
        (id: 3, kind: Dialogue, inputs: [(id: 30)]),
    ]"#;
    let player = FlowPlayer::builder()
        .with_graph(FlowGraph::parse_ron(graph).unwrap())
        .pause_on(&[NodeKind::Hub, NodeKind::Dialogue])
        .build()
        .unwrap();
    let mut state = player.new_state(quest_store());
    let set = player.get_valid_branches(&mut state, NodeId(1)).unwrap();
    assert_eq!(set.targets(), vec![NodeId(2)]);
}

#[test]
fn seen_counters_advance_only_on_commit() {
    let (mut player, mut state) = player_for(QUEST, 1);
    player.branches(&mut state).unwrap();
    assert_eq!(state.seen_counter(NodeId(2)), 0);
    player.play(&mut state, 0).unwrap();
    assert_eq!(state.seen_counter(NodeId(2)), 1);
    assert_eq!(state.seen_counter(NodeId(3)), 1);
}

type Heard = Rc<RefCell<Vec<(GvName, Value)>>>;

fn listen(state: &mut FlowState) -> Heard {
    let heard: Heard = Rc::default();
    let sink = Rc::clone(&heard);
    state.on_variable_changed(move |name, value| {
        sink.borrow_mut().push((name.clone(), value.clone()));
    });
    heard
}

#[test]
fn variable_listeners_hear_only_committed_changes() {
    let graph = r#"[
        (id: 1, kind: Dialogue, outputs: [(id: 10, connections: [20])]),
        (id: 2, kind: Instruction,
         expression: "Quest.Started = true; Quest.Stage += 1; Quest.Stage += 1; Quest.Gold = 0",
         inputs: [(id: 20)], outputs: [(id: 21, connections: [30])]),
        (id: 3, kind: Dialogue, inputs: [(id: 30)]),
    ]"#;
    let mut store = quest_store();
    store
        .declare(&GvName::new("Quest", "Stage"), Value::Int(0))
        .unwrap();
    store
        .declare(&GvName::new("Quest", "Gold"), Value::Int(0))
        .unwrap();
    let mut player = FlowPlayer::builder()
        .with_graph(FlowGraph::parse_ron(graph).unwrap())
        .start_on(NodeId(1))
        .build()
        .unwrap();
    let mut state = player.new_state(store);
    let heard = listen(&mut state);

    player.peek(&mut state, NodeId(1)).unwrap();
    player.branches(&mut state).unwrap();
    player.begin_speculation(&mut state);
    player.play(&mut state, 0).unwrap();
    player.discard_speculation(&mut state).unwrap();
    assert!(heard.borrow().is_empty());

    player.play(&mut state, 0).unwrap();
    assert_eq!(
        *heard.borrow(),
        vec![
            (GvName::new("Quest", "Started"), Value::Bool(true)),
            (GvName::new("Quest", "Stage"), Value::Int(2)),
        ]
    );
}

#[test]
fn speculation_commit_notifies_once_at_the_bottom() {
    let (mut player, mut state) = player_for(QUEST, 1);
    let heard = listen(&mut state);

    player.begin_speculation(&mut state);
    player.play(&mut state, 0).unwrap();
    assert!(heard.borrow().is_empty());
    player.commit_speculation(&mut state).unwrap();
    assert_eq!(
        *heard.borrow(),
        vec![(GvName::new("Quest", "Started"), Value::Bool(true))]
    );
}

#[test]
fn node_properties_are_shadowed_with_the_rest_of_the_state() {
    let graph = r#"[
        (id: 1, kind: Dialogue, outputs: [(id: 10, connections: [20])]),
        (id: 2, kind: Instruction, expression: "setProp(3, 'Text', 'The door is open.')",
         inputs: [(id: 20)], outputs: [(id: 21, connections: [30])]),
        (id: 3, kind: Dialogue, features: [Text("The door is locked.")],
         inputs: [(id: 30)], outputs: [(id: 31, connections: [40])]),
        (id: 4, kind: Condition, expression: "getProp(3, 'Text') == 'The door is open.'",
         inputs: [(id: 40)],
         outputs: [(id: 41, connections: [50]), (id: 42, connections: [60])]),
        (id: 5, kind: Dialogue, inputs: [(id: 50)]),
        (id: 6, kind: Dialogue, inputs: [(id: 60)]),
    ]"#;
    let (mut player, mut state) = player_for(graph, 1);
    let text = |state: &FlowState| {
        state
            .committed_properties()
            .get(NodeId(3), "Text")
            .unwrap()
            .clone()
    };

    assert_eq!(player.peek(&mut state, NodeId(3)).unwrap().targets(), vec![NodeId(6)]);
    player.peek(&mut state, NodeId(1)).unwrap();
    assert_eq!(text(&state), Value::from("The door is locked."));

    player.play(&mut state, 0).unwrap();
    assert_eq!(text(&state), Value::from("The door is open."));
    assert_eq!(player.peek(&mut state, NodeId(3)).unwrap().targets(), vec![NodeId(5)]);
}
