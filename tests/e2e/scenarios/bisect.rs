use crate::harness::Scenario;
use dbvc_core::Value;

/// Sixteen commits on `main`; `c9` introduces the row `flags[id=1]`.
fn regression_history() -> Scenario {
    let mut scenario = Scenario::new("bisect").create_table("flags", &["id"], &["id"]);
    for i in 1..=16 {
        if i == 9 {
            scenario = scenario.insert("flags", &[("id", Value::from(1))]);
        }
        scenario = scenario
            .insert("log", &[("n", Value::from(i))])
            .commit_as(&format!("c{}", i), &format!("step {}", i));
    }
    scenario
}

#[test]
fn test_bisect_finds_regression_in_log_steps() {
    regression_history()
        .bisect_start("c1", "c16")
        .bisect_until_found("flags", "id=1")
        // 15 candidates: at most ceil(log2(15)) answers
        .assert_bisect_found("c9", 4)
        .assert_no_bisect()
        .run()
        .unwrap();
}

#[test]
fn test_bisect_rejects_reversed_range() {
    regression_history()
        .bisect_start("c16", "c1")
        .fails_with("invalid bisect range")
        .assert_no_bisect()
        .run()
        .unwrap();
}

#[test]
fn test_bisect_all_good_blames_bad_end() {
    regression_history()
        .bisect_start("c8", "c16")
        .bisect_until_found("log", "#none")
        // Every candidate answers good, so the starting bad commit is blamed
        .assert_bisect_found("c16", 3)
        .run()
        .unwrap();
}
