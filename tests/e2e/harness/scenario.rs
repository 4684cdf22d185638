use super::assertions::Assertion;
use super::runner::ScenarioRunner;
use super::steps::ScenarioStep;
use dbvc_core::{MergeKind, MergeStrategy, Value};

/// Fluent DSL for building test scenarios
pub struct Scenario {
    name: String,
    fixture: Option<String>,
    steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Create a new scenario with the given name
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fixture: None,
            steps: Vec::new(),
        }
    }

    // ===== Initial setup =====

    /// Start the working database from `tests/fixtures/<name>/snapshot.json`
    pub fn from_fixture(mut self, name: &str) -> Self {
        self.fixture = Some(name.to_string());
        self
    }

    // ===== Working database edits =====

    pub fn create_table(mut self, table: &str, columns: &[&str], primary_key: &[&str]) -> Self {
        self.steps.push(ScenarioStep::CreateTable {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            primary_key: primary_key.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn insert(mut self, table: &str, cells: &[(&str, Value)]) -> Self {
        self.steps.push(ScenarioStep::InsertRow {
            table: table.to_string(),
            cells: cells
                .iter()
                .map(|(c, v)| (c.to_string(), v.clone()))
                .collect(),
        });
        self
    }

    pub fn update(mut self, table: &str, key: &str, column: &str, value: impl Into<Value>) -> Self {
        self.steps.push(ScenarioStep::UpdateCell {
            table: table.to_string(),
            key: key.to_string(),
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn delete_row(mut self, table: &str, key: &str) -> Self {
        self.steps.push(ScenarioStep::DeleteRow {
            table: table.to_string(),
            key: key.to_string(),
        });
        self
    }

    // ===== History =====

    /// Commit the working database
    pub fn commit(mut self, message: &str) -> Self {
        self.steps.push(ScenarioStep::Commit {
            message: message.to_string(),
            label: None,
        });
        self
    }

    /// Commit and remember the commit id under `label`
    pub fn commit_as(mut self, label: &str, message: &str) -> Self {
        self.steps.push(ScenarioStep::Commit {
            message: message.to_string(),
            label: Some(label.to_string()),
        });
        self
    }

    /// Remember the current HEAD under `label`
    pub fn label_head(mut self, label: &str) -> Self {
        self.steps.push(ScenarioStep::Label {
            label: label.to_string(),
        });
        self
    }

    /// Commit `count` single-row inserts into `table`, labelled `c1..cN`
    pub fn commit_chain(mut self, table: &str, count: usize) -> Self {
        for i in 1..=count {
            self = self
                .insert(table, &[("id", Value::from(i as i64))])
                .commit_as(&format!("c{}", i), &format!("insert row {}", i));
        }
        self
    }

    // ===== Branches =====

    pub fn branch(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::CreateBranch {
            name: name.to_string(),
        });
        self
    }

    pub fn checkout(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::Checkout {
            name: name.to_string(),
        });
        self
    }

    pub fn delete_branch(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::DeleteBranch {
            name: name.to_string(),
            force: false,
        });
        self
    }

    pub fn force_delete_branch(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::DeleteBranch {
            name: name.to_string(),
            force: true,
        });
        self
    }

    pub fn protect(mut self, name: &str) -> Self {
        self.steps.push(ScenarioStep::Protect {
            name: name.to_string(),
        });
        self
    }

    /// Merge with the configured strategy
    pub fn merge(mut self, branch: &str) -> Self {
        self.steps.push(ScenarioStep::Merge {
            branch: branch.to_string(),
            strategy: None,
            allow_conflicts: false,
        });
        self
    }

    pub fn merge_with(mut self, branch: &str, strategy: MergeStrategy) -> Self {
        self.steps.push(ScenarioStep::Merge {
            branch: branch.to_string(),
            strategy: Some(strategy),
            allow_conflicts: false,
        });
        self
    }

    pub fn merge_allowing_conflicts(mut self, branch: &str) -> Self {
        self.steps.push(ScenarioStep::Merge {
            branch: branch.to_string(),
            strategy: None,
            allow_conflicts: true,
        });
        self
    }

    // ===== Stash =====

    /// Stash the working database and reset it to HEAD
    pub fn stash_push(mut self, message: &str) -> Self {
        self.steps.push(ScenarioStep::StashPush {
            message: message.to_string(),
        });
        self
    }

    /// Pop the latest stash into the working database
    pub fn stash_pop(mut self) -> Self {
        self.steps.push(ScenarioStep::StashPop);
        self
    }

    // ===== Bisect =====

    pub fn bisect_start(mut self, good: &str, bad: &str) -> Self {
        self.steps.push(ScenarioStep::BisectStart {
            good: good.to_string(),
            bad: bad.to_string(),
        });
        self
    }

    /// Answer every bisect step by whether `table` holds the row `key`
    pub fn bisect_until_found(mut self, table: &str, key: &str) -> Self {
        self.steps.push(ScenarioStep::BisectUntilFound {
            table: table.to_string(),
            key: key.to_string(),
        });
        self
    }

    // ===== Time control =====

    pub fn wait_days(mut self, days: u64) -> Self {
        self.steps.push(ScenarioStep::WaitDays { days });
        self
    }

    // ===== Failure simulation =====

    /// Drop the repository handle without any cleanup
    pub fn crash(mut self) -> Self {
        self.steps.push(ScenarioStep::Crash);
        self
    }

    /// Reopen the repository from disk
    pub fn restart(mut self) -> Self {
        self.steps.push(ScenarioStep::Restart);
        self
    }

    /// The previous step must fail with an error mentioning `contains`
    pub fn fails_with(mut self, contains: &str) -> Self {
        if let Some(step) = self.steps.pop() {
            self.steps.push(ScenarioStep::ExpectFailure {
                step: Box::new(step),
                contains: contains.to_string(),
            });
        }
        self
    }

    // ===== Assertions =====

    /// Add a general assertion
    pub fn assert(mut self, assertion: Assertion) -> Self {
        self.steps.push(ScenarioStep::Assert { assertion });
        self
    }

    pub fn assert_head_valid(self) -> Self {
        self.assert(Assertion::HeadValid)
    }

    pub fn assert_current_branch(self, name: &str) -> Self {
        self.assert(Assertion::CurrentBranch(name.to_string()))
    }

    pub fn assert_branch_exists(self, name: &str) -> Self {
        self.assert(Assertion::BranchExists(name.to_string()))
    }

    pub fn assert_branch_missing(self, name: &str) -> Self {
        self.assert(Assertion::BranchMissing(name.to_string()))
    }

    /// Assert the exact set of branch names
    pub fn assert_branches(self, names: &[&str]) -> Self {
        self.assert(Assertion::Branches(
            names.iter().map(|n| n.to_string()).collect(),
        ))
    }

    pub fn assert_branch_at(self, branch: &str, label: &str) -> Self {
        self.assert(Assertion::BranchAt {
            branch: branch.to_string(),
            label: label.to_string(),
        })
    }

    /// Assert first-parent history length from HEAD
    pub fn assert_commit_count(self, count: usize) -> Self {
        self.assert(Assertion::CommitCount(count))
    }

    pub fn assert_head_contains(self, text: &str) -> Self {
        self.assert(Assertion::HeadMessageContains(text.to_string()))
    }

    pub fn assert_head_parents(self, count: usize) -> Self {
        self.assert(Assertion::HeadParentCount(count))
    }

    /// Assert history from HEAD is a single chain of `count` commits
    pub fn assert_linear_chain(self, count: usize) -> Self {
        self.assert(Assertion::LinearChain(count))
    }

    pub fn assert_row(self, table: &str, key: &str, column: &str, value: impl Into<Value>) -> Self {
        self.assert(Assertion::RowValue {
            table: table.to_string(),
            key: key.to_string(),
            column: column.to_string(),
            value: value.into(),
        })
    }

    pub fn assert_row_missing(self, table: &str, key: &str) -> Self {
        self.assert(Assertion::RowMissing {
            table: table.to_string(),
            key: key.to_string(),
        })
    }

    pub fn assert_row_count(self, table: &str, count: usize) -> Self {
        self.assert(Assertion::RowCount {
            table: table.to_string(),
            count,
        })
    }

    pub fn assert_working_matches_head(self) -> Self {
        self.assert(Assertion::WorkingMatchesHead)
    }

    pub fn assert_last_merge(self, kind: MergeKind, success: bool) -> Self {
        self.assert(Assertion::LastMerge { kind, success })
    }

    pub fn assert_conflicts_gte(self, count: usize) -> Self {
        self.assert(Assertion::LastMergeConflictsGte(count))
    }

    pub fn assert_diff_mirrors(self, from: &str, to: &str) -> Self {
        self.assert(Assertion::DiffMirrors {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn assert_bisect_found(self, label: &str, max_steps: u32) -> Self {
        self.assert(Assertion::BisectFound {
            label: label.to_string(),
            max_steps,
        })
    }

    pub fn assert_no_bisect(self) -> Self {
        self.assert(Assertion::NoBisect)
    }

    pub fn assert_stash_count(self, count: usize) -> Self {
        self.assert(Assertion::StashCount(count))
    }

    pub fn assert_verify_clean(self) -> Self {
        self.assert(Assertion::VerifyClean)
    }

    // ===== Execution =====

    /// Execute the scenario and return results
    pub fn run(self) -> ScenarioResult {
        let mut runner = match ScenarioRunner::new(self.fixture.as_deref()) {
            Ok(r) => r,
            Err(e) => {
                return ScenarioResult {
                    name: self.name.clone(),
                    success: false,
                    steps_executed: 0,
                    failure_step: Some(0),
                    error: Some(format!("Failed to create runner: {:#}", e)),
                }
            }
        };

        match runner.execute(&self.steps) {
            Ok(()) => ScenarioResult {
                name: self.name,
                success: true,
                steps_executed: self.steps.len(),
                failure_step: None,
                error: None,
            },
            Err(e) => {
                let failure_step = runner.current_step();
                ScenarioResult {
                    name: self.name,
                    success: false,
                    steps_executed: failure_step,
                    failure_step: Some(failure_step),
                    error: Some(format!("{:?}", e)),
                }
            }
        }
    }
}

/// Result of running a scenario
#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub steps_executed: usize,
    pub failure_step: Option<usize>,
    pub error: Option<String>,
}

impl ScenarioResult {
    /// Unwrap the result, panicking if it failed
    pub fn unwrap(self) {
        if !self.success {
            panic!(
                "Scenario '{}' failed at step {}: {}",
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }

    /// Expect the result to be successful
    pub fn expect(self, msg: &str) {
        if !self.success {
            panic!(
                "{}: Scenario '{}' failed at step {}: {}",
                msg,
                self.name,
                self.failure_step.unwrap_or(0),
                self.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
    }
}
