use crate::harness::Scenario;
use dbvc_core::{MergeKind, Value};

#[test]
fn test_checkout_switches_branch_and_data() {
    Scenario::new("checkout")
        .create_table("t", &["id"], &["id"])
        .commit_chain("t", 1)
        .branch("feature")
        .checkout("feature")
        .assert_current_branch("feature")
        .insert("t", &[("id", Value::from(2))])
        .commit("feature row")
        .checkout("main")
        .assert_current_branch("main")
        .assert_working_matches_head()
        .assert_row_missing("t", "id=2")
        .checkout("feature")
        .assert_row_count("t", 2)
        .assert_working_matches_head()
        .assert_head_valid()
        .run()
        .unwrap();
}

#[test]
fn test_create_then_delete_restores_branches() {
    Scenario::new("create_delete")
        .create_table("t", &["id"], &["id"])
        .commit_chain("t", 1)
        .branch("scratch")
        .assert_branches(&["main", "scratch"])
        .delete_branch("scratch")
        .assert_branches(&["main"])
        .assert_head_valid()
        .run()
        .unwrap();
}

#[test]
fn test_current_and_protected_branches_resist_deletion() {
    Scenario::new("delete_guards")
        .create_table("t", &["id"], &["id"])
        .commit_chain("t", 1)
        .delete_branch("main")
        .fails_with("current branch")
        .branch("release")
        .protect("release")
        .delete_branch("release")
        .fails_with("protected")
        .assert_branch_exists("release")
        .force_delete_branch("release")
        .assert_branch_missing("release")
        .run()
        .unwrap();
}

#[test]
fn test_feature_fast_forward_then_cleanup() {
    Scenario::new("c1_c2_c3")
        .create_table("t", &["id"], &["id"])
        .insert("t", &[("id", Value::from(1))])
        .commit_as("C1", "C1")
        .insert("t", &[("id", Value::from(2))])
        .commit_as("C2", "C2")
        .branch("feature")
        .assert_branch_at("feature", "C2")
        .checkout("feature")
        .insert("t", &[("id", Value::from(3))])
        .commit_as("C3", "C3")
        .checkout("main")
        .merge("feature")
        .assert_last_merge(MergeKind::FastForward, true)
        .assert_branch_at("main", "C3")
        .assert_head_parents(1)
        .assert_commit_count(3)
        .assert_working_matches_head()
        .delete_branch("feature")
        .assert_branches(&["main"])
        .assert_branch_at("main", "C3")
        .assert_verify_clean()
        .run()
        .expect("fast-forward scenario should pass");
}
