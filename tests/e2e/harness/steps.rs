use dbvc_core::{MergeStrategy, Value};

use super::assertions::Assertion;

/// All possible actions in a test scenario.
///
/// Data steps edit the runner's working snapshot, which stands in for the
/// live database; repository steps act on the repository.
#[derive(Debug)]
pub enum ScenarioStep {
    // Working database edits
    CreateTable {
        table: String,
        columns: Vec<String>,
        primary_key: Vec<String>,
    },
    InsertRow {
        table: String,
        cells: Vec<(String, Value)>,
    },
    UpdateCell {
        table: String,
        key: String,
        column: String,
        value: Value,
    },
    DeleteRow {
        table: String,
        key: String,
    },

    // History
    Commit {
        message: String,
        label: Option<String>,
    },
    Label {
        label: String,
    },

    // Branches
    CreateBranch {
        name: String,
    },
    Checkout {
        name: String,
    },
    DeleteBranch {
        name: String,
        force: bool,
    },
    Protect {
        name: String,
    },
    Merge {
        branch: String,
        strategy: Option<MergeStrategy>,
        allow_conflicts: bool,
    },

    // Stash
    StashPush {
        message: String,
    },
    StashPop,

    // Bisect
    BisectStart {
        good: String,
        bad: String,
    },
    /// Mark the current candidate bad while `table` holds `key`, good
    /// otherwise, until the session ends.
    BisectUntilFound {
        table: String,
        key: String,
    },

    // Time control
    WaitDays {
        days: u64,
    },

    // Failure simulation
    Crash,
    Restart,

    // Expected failures
    ExpectFailure {
        step: Box<ScenarioStep>,
        contains: String,
    },

    // Assertions (can be interspersed)
    Assert {
        assertion: Assertion,
    },
}
