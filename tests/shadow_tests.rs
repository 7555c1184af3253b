/// Shadow layer integration tests — isolation, commit fidelity, stack order.

use narrative_flow::core::evaluator::execute_instruction;
use narrative_flow::core::shadow::ShadowError;
use narrative_flow::core::state::FlowState;
use narrative_flow::core::store::{StoreView, VariableStore};
use narrative_flow::schema::node::NodeId;
use narrative_flow::schema::variable::{GvName, Value};

fn make_store() -> VariableStore {
    VariableStore::parse_ron(
        r#"[
        (name: "Quest", variables: [
            (name: "Started", value: Bool(false)),
            (name: "Stage", value: Int(0)),
        ]),
        (name: "Player", variables: [
            (name: "Name", value: String("Wanda")),
        ]),
    ]"#,
    )
    .unwrap()
}

const INSTRUCTIONS: &[&str] = &[
    "Quest.Started = true",
    "Quest.Stage += 3",
    "Player.Name = Player.Name + ' the Brave'",
    "Quest.Stage *= 2; Quest.Started = !Quest.Started",
    "setSeenCounter(0x10, 4)",
];

#[test]
fn discarded_shadow_leaves_store_untouched() {
    let mut state = FlowState::new(make_store());
    let before = state.committed_variables().entries();

    let token = state.begin_shadow();
    for text in INSTRUCTIONS {
        execute_instruction(text, &mut state).unwrap();
    }
    assert_ne!(state.variables().entries(), before);
    state.discard_shadow(token).unwrap();

    assert_eq!(state.committed_variables().entries(), before);
    assert_eq!(state.variables().entries(), before);
    assert_eq!(state.seen_counter(NodeId(0x10)), 0);
}

#[test]
fn committed_shadow_matches_direct_writes() {
    let mut direct = FlowState::new(make_store());
    for text in INSTRUCTIONS {
        execute_instruction(text, &mut direct).unwrap();
    }

    let mut shadowed = FlowState::new(make_store());
    let token = shadowed.begin_shadow();
    for text in INSTRUCTIONS {
        execute_instruction(text, &mut shadowed).unwrap();
    }
    shadowed.commit_shadow(token).unwrap();

    assert_eq!(shadowed.committed_variables(), direct.committed_variables());
    assert_eq!(shadowed.committed_seen(), direct.committed_seen());
}

#[test]
fn nested_commit_then_outer_discard() {
    let mut state = FlowState::new(make_store());
    let started = GvName::new("Quest", "Started");

    let outer = state.begin_shadow();
    let inner = state.begin_shadow();
    state.set_value(&started, Value::Bool(true)).unwrap();
    state.commit_shadow(inner).unwrap();
    assert_eq!(state.value(&started).unwrap(), &Value::Bool(true));
    assert_eq!(
        state.committed_variables().value(&started).unwrap(),
        &Value::Bool(false)
    );

    state.discard_shadow(outer).unwrap();
    assert_eq!(state.value(&started).unwrap(), &Value::Bool(false));
}

#[test]
fn out_of_order_release_fails_without_side_effects() {
    let mut state = FlowState::new(make_store());
    let stage = GvName::new("Quest", "Stage");

    let outer = state.begin_shadow();
    state.set_value(&stage, Value::Int(1)).unwrap();
    let inner = state.begin_shadow();
    state.set_value(&stage, Value::Int(2)).unwrap();

    for attempt in [state.commit_shadow(outer), state.discard_shadow(outer)] {
        match attempt {
            Err(ShadowError::StackOrderViolation { token, top }) => {
                assert_eq!(token, outer);
                assert_eq!(top, Some(inner));
            }
            other => panic!("expected stack order violation, got {other:?}"),
        }
    }
    assert_eq!(state.shadow_level(), 2);
    assert_eq!(state.value(&stage).unwrap(), &Value::Int(2));

    // A released token cannot be released again.
    state.discard_shadow(inner).unwrap();
    assert!(state.discard_shadow(inner).is_err());
    assert_eq!(state.value(&stage).unwrap(), &Value::Int(1));
    state.commit_shadow(outer).unwrap();
    assert_eq!(
        state.committed_variables().value(&stage).unwrap(),
        &Value::Int(1)
    );
}

#[test]
fn failed_instruction_inside_shadow_is_atomic() {
    let mut state = FlowState::new(make_store());
    let token = state.begin_shadow();
    execute_instruction("Quest.Stage = 5", &mut state).unwrap();
    let visible = state.variables().clone();

    assert!(execute_instruction("Quest.Stage = 6; Quest.Started = 1", &mut state).is_err());
    assert_eq!(state.variables(), &visible);
    state.commit_shadow(token).unwrap();
    assert_eq!(
        state.committed_variables().value(&GvName::new("Quest", "Stage")).unwrap(),
        &Value::Int(5)
    );
}

#[test]
fn save_game_restore_needs_no_open_layer() {
    let mut state = FlowState::new(make_store());
    let saved = vec![(GvName::new("Quest", "Stage"), Value::Int(9))];

    let token = state.begin_shadow();
    assert!(matches!(
        state.variables_mut(),
        Err(ShadowError::ShadowActive { level: 1 })
    ));
    state.discard_shadow(token).unwrap();

    state.variables_mut().unwrap().restore(&saved).unwrap();
    assert_eq!(
        state.value(&GvName::new("Quest", "Stage")).unwrap(),
        &Value::Int(9)
    );
}
