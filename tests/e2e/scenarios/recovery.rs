use crate::harness::Scenario;
use dbvc_core::Value;

#[test]
fn test_history_survives_crash() {
    Scenario::new("crash_restart")
        .create_table("t", &["id"], &["id"])
        .commit_chain("t", 3)
        .branch("feature")
        .checkout("feature")
        .crash()
        .commit("lost")
        .fails_with("not available")
        .restart()
        .assert_current_branch("feature")
        .assert_linear_chain(3)
        .assert_head_valid()
        .assert_verify_clean()
        .run()
        .unwrap();
}

#[test]
fn test_bisect_session_survives_restart() {
    Scenario::new("bisect_restart")
        .create_table("t", &["id"], &["id"])
        .commit_chain("t", 5)
        .bisect_start("c1", "c5")
        .restart()
        .bisect_until_found("t", "id=3")
        .assert_bisect_found("c3", 2)
        .run()
        .unwrap();
}

#[test]
fn test_work_continues_after_restart() {
    Scenario::new("continue_after_restart")
        .from_fixture("shop")
        .commit("import")
        .wait_days(3)
        .restart()
        .update("orders", "id=10", "total", Value::from(99))
        .commit("discount")
        .assert_row("orders", "id=10", "total", Value::from(99))
        .assert_commit_count(2)
        .run()
        .unwrap();
}
