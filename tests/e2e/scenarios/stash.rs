use crate::harness::Scenario;
use dbvc_core::Value;

#[test]
fn test_pop_on_empty_stack_fails_without_changes() {
    Scenario::new("empty_pop")
        .create_table("t", &["id"], &["id"])
        .commit_chain("t", 1)
        .stash_pop()
        .fails_with("no stash entries")
        .assert_stash_count(0)
        .assert_working_matches_head()
        .run()
        .unwrap();
}

#[test]
fn test_pop_restores_most_recent_stash() {
    Scenario::new("stash_pop")
        .create_table("t", &["id", "v"], &["id"])
        .commit_chain("t", 1)
        .insert("t", &[("id", Value::from(2))])
        .stash_push("first")
        .assert_working_matches_head()
        .insert("t", &[("id", Value::from(3))])
        .stash_push("second")
        .assert_stash_count(2)
        .stash_pop()
        .assert_stash_count(1)
        .stash_pop()
        .assert_stash_count(0)
        .commit("restored first")
        .assert_row_count("t", 2)
        .assert_row_missing("t", "id=3")
        .run()
        .unwrap();
}

#[test]
fn test_stash_survives_restart() {
    Scenario::new("stash_restart")
        .create_table("t", &["id"], &["id"])
        .commit_chain("t", 1)
        .insert("t", &[("id", Value::from(9))])
        .stash_push("wip")
        .restart()
        .assert_stash_count(1)
        .stash_pop()
        .commit("wip")
        .assert_row_count("t", 2)
        .run()
        .unwrap();
}
