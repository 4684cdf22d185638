use crate::harness::Scenario;
use dbvc_core::{MergeKind, MergeStrategy};

/// `main` and `feature` both branch from the imported shop data.
fn diverged(name: &str) -> Scenario {
    Scenario::new(name)
        .from_fixture("shop")
        .commit_as("base", "import shop")
        .branch("feature")
}

#[test]
fn test_non_overlapping_changes_merge_cleanly() {
    diverged("non_overlapping")
        .update("users", "id=1", "email", "ada@lovelace.org")
        .commit_as("ours", "update ada")
        .checkout("feature")
        .update("users", "id=2", "name", "Grace Hopper")
        .commit_as("theirs", "rename grace")
        .checkout("main")
        .merge("feature")
        .assert_last_merge(MergeKind::Merge, true)
        .assert_conflicts_gte(0)
        .assert_head_parents(2)
        .assert_head_contains("Merge branch 'feature' into main")
        .assert_row("users", "id=1", "email", "ada@lovelace.org")
        .assert_row("users", "id=2", "name", "Grace Hopper")
        .assert_working_matches_head()
        .assert_verify_clean()
        .run()
        .unwrap();
}

#[test]
fn test_different_columns_of_one_row_merge_cleanly() {
    diverged("column_merge")
        .update("users", "id=1", "email", "ada@lovelace.org")
        .commit("ours")
        .checkout("feature")
        .update("users", "id=1", "name", "Augusta Ada")
        .commit("theirs")
        .checkout("main")
        .merge("feature")
        .assert_last_merge(MergeKind::Merge, true)
        .assert_row("users", "id=1", "email", "ada@lovelace.org")
        .assert_row("users", "id=1", "name", "Augusta Ada")
        .run()
        .unwrap();
}

fn same_cell(name: &str) -> Scenario {
    diverged(name)
        .update("users", "id=1", "name", "Ada Lovelace")
        .commit_as("ours", "ours")
        .checkout("feature")
        .update("users", "id=1", "name", "Ada King")
        .commit_as("theirs", "theirs")
        .checkout("main")
}

#[test]
fn test_same_cell_conflict_stops_merge() {
    same_cell("same_cell_conflict")
        .merge("feature")
        .assert_last_merge(MergeKind::Merge, false)
        .assert_conflicts_gte(1)
        .assert_branch_at("main", "ours")
        .assert_row("users", "id=1", "name", "Ada Lovelace")
        .assert_working_matches_head()
        .run()
        .unwrap();
}

#[test]
fn test_same_cell_conflict_resolved_by_theirs() {
    same_cell("same_cell_theirs")
        .merge_with("feature", MergeStrategy::Theirs)
        .assert_last_merge(MergeKind::Merge, true)
        .assert_conflicts_gte(1)
        .assert_head_parents(2)
        .assert_row("users", "id=1", "name", "Ada King")
        .run()
        .unwrap();
}

#[test]
fn test_same_cell_conflict_allowed_keeps_ours() {
    same_cell("same_cell_allowed")
        .merge_allowing_conflicts("feature")
        .assert_last_merge(MergeKind::Merge, true)
        .assert_conflicts_gte(1)
        .assert_row("users", "id=1", "name", "Ada Lovelace")
        .run()
        .unwrap();
}

#[test]
fn test_merging_an_ancestor_is_up_to_date() {
    diverged("up_to_date")
        .update("users", "id=1", "name", "Ada Lovelace")
        .commit("ahead")
        .merge("feature")
        .assert_last_merge(MergeKind::UpToDate, true)
        .assert_commit_count(2)
        .run()
        .unwrap();
}

#[test]
fn test_diff_mirrors_across_branches() {
    same_cell("diff_mirror")
        .assert_diff_mirrors("ours", "theirs")
        .assert_diff_mirrors("base", "theirs")
        .run()
        .unwrap();
}
