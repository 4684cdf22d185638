use crate::harness::{Assertion, Scenario};
use dbvc_core::Value;

#[test]
fn test_fresh_repository_head_is_valid() {
    Scenario::new("fresh_head")
        .assert_head_valid()
        .assert_current_branch("main")
        .assert_branches(&["main"])
        .assert_commit_count(0)
        .run()
        .expect("scenario should pass");
}

#[test]
fn test_sequential_commits_form_a_chain() {
    Scenario::new("commit_chain")
        .create_table("t", &["id"], &["id"])
        .commit_chain("t", 6)
        .assert_linear_chain(6)
        .assert_branch_at("main", "c6")
        .assert_row_count("t", 6)
        .assert_head_contains("insert row 6")
        .assert_head_valid()
        .assert_verify_clean()
        .run()
        .unwrap();
}

#[test]
fn test_fixture_round_trips_through_history() {
    Scenario::new("fixture_history")
        .from_fixture("shop")
        .commit_as("initial", "import shop")
        .assert_row("users", "id=1", "name", "Ada")
        .assert_row("orders", "id=11", "total", Value::from(250))
        .update("users", "id=2", "email", "grace@navy.mil")
        .delete_row("orders", "id=10")
        .insert("orders", &[("id", Value::from(12)), ("user_id", Value::from(2)), ("total", Value::from(7))])
        .commit_as("edited", "edit shop")
        .assert_row("users", "id=2", "email", "grace@navy.mil")
        .assert_row_missing("orders", "id=10")
        .assert_row_count("orders", 2)
        .assert_diff_mirrors("initial", "edited")
        .assert_diff_mirrors("edited", "initial")
        .assert(Assertion::Custom(Box::new(|repo| {
            let head = repo.head()?.ok_or_else(|| anyhow::anyhow!("no head"))?;
            let parent = repo.resolve("HEAD~1")?;
            let diff = repo.diff(parent, head)?;
            anyhow::ensure!(diff.summary.insertions == 1, "{:?}", diff.summary);
            anyhow::ensure!(diff.summary.deletions == 1, "{:?}", diff.summary);
            anyhow::ensure!(diff.summary.modifications == 1, "{:?}", diff.summary);
            Ok(())
        })))
        .run()
        .unwrap();
}

#[test]
fn test_reflog_records_commits_and_checkouts() {
    Scenario::new("reflog")
        .create_table("t", &["id"], &["id"])
        .commit_chain("t", 2)
        .branch("topic")
        .checkout("topic")
        .checkout("main")
        .assert(Assertion::Custom(Box::new(|repo| {
            let entries = repo.get_reflog(&dbvc_core::ReflogQuery {
                ref_name: Some("HEAD".to_string()),
                ..Default::default()
            })?;
            anyhow::ensure!(entries.len() == 2, "HEAD moved {} times", entries.len());
            anyhow::ensure!(entries[0].message.contains("from topic to main"), "{}", entries[0].message);
            let main = repo.get_reflog(&dbvc_core::ReflogQuery {
                ref_name: Some("main".to_string()),
                ..Default::default()
            })?;
            anyhow::ensure!(
                main.iter().filter(|e| e.action == dbvc_core::ReflogAction::Commit).count() == 2,
                "main reflog: {:?}",
                main
            );
            Ok(())
        })))
        .run()
        .unwrap();
}
