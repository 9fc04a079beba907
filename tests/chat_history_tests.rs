// Unit tests for bounded conversation history
//
// Covers the rollback protocol and both compression paths (summary and
// hard truncation).

use voicepipe::chat::{ChatHistory, Role};

fn filled(pairs: usize, max_turns: usize) -> ChatHistory {
    let mut history = ChatHistory::new(max_turns);
    for i in 0..pairs {
        history.push_user(format!("question {i}"));
        history.push_assistant(format!("answer {i}"));
    }
    history
}

#[test]
fn test_turns_accumulate_in_order() {
    let history = filled(2, 10);
    assert_eq!(history.len(), 4);
    assert_eq!(history.turns()[0].role, Role::User);
    assert_eq!(history.turns()[1].role, Role::Assistant);
    assert_eq!(history.turns()[3].content, "answer 1");
}

#[test]
fn test_rollback_removes_only_a_trailing_user_turn() {
    let mut history = filled(1, 10);
    // last turn is an assistant turn; rollback must refuse
    assert!(!history.rollback_user());
    assert_eq!(history.len(), 2);

    history.push_user("unanswered");
    assert!(history.rollback_user());
    assert_eq!(history.len(), 2);
    assert_eq!(history.turns()[1].role, Role::Assistant);
}

#[test]
fn test_rollback_on_empty_history() {
    let mut history = ChatHistory::new(5);
    assert!(!history.rollback_user());
}

#[test]
fn test_compression_threshold_is_twice_the_cap() {
    let mut history = filled(3, 3);
    assert_eq!(history.len(), 6);
    assert!(!history.needs_compression());

    history.push_user("one more");
    assert!(history.needs_compression());
}

#[test]
fn test_compressible_excludes_recent_turns() {
    let history = filled(4, 3);
    let old = history.compressible();
    assert_eq!(old.len(), 5);
    assert_eq!(old[0].content, "question 0");
    assert_eq!(old[4].content, "question 2");
}

#[test]
fn test_apply_summary_folds_the_prefix() {
    let mut history = filled(4, 3);
    history.apply_summary("Earlier, the user asked three questions.");

    assert_eq!(history.len(), 4);
    assert_eq!(history.turns()[0].role, Role::User);
    assert_eq!(
        history.turns()[0].content,
        "Earlier, the user asked three questions."
    );
    // the most recent turns survive untouched
    assert_eq!(history.turns()[1].content, "answer 2");
    assert_eq!(history.turns()[3].content, "answer 3");
    assert!(!history.needs_compression());
}

#[test]
fn test_truncate_hard_keeps_recent_double_cap() {
    let mut history = filled(5, 2);
    assert_eq!(history.len(), 10);

    history.truncate_hard();
    assert_eq!(history.len(), 4);
    assert_eq!(history.turns()[0].content, "question 3");
    assert_eq!(history.turns()[3].content, "answer 4");
}

#[test]
fn test_truncate_hard_on_short_history_is_a_no_op() {
    let mut history = filled(1, 5);
    history.truncate_hard();
    assert_eq!(history.len(), 2);
}
