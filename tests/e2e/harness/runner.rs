use super::assertions::Assertion;
use super::clock::MockClock;
use super::steps::ScenarioStep;
use super::workspace::{fixture_snapshot, TestWorkspace};
use anyhow::{anyhow, bail, ensure, Context, Result};
use dbvc_core::{
    diff_snapshots, row_key, Author, BisectSession, BisectStatus, ColumnDefinition,
    Commit, DatabaseSnapshot, DbvcRepo, LogOptions, MergeOptions, MergeResult, MergeStrategy, ObjectId,
    Row, TableDefinition, Value, VerifyConfig,
};
use std::collections::HashMap;
use std::time::Duration;

/// Bisect answers given before the runner gives up on convergence.
const MAX_BISECT_ROUNDS: usize = 64;

/// Executes scenarios against a real on-disk repository
pub struct ScenarioRunner {
    workspace: TestWorkspace,
    repo: Option<DbvcRepo>,
    clock: MockClock,
    author: Author,
    /// Stand-in for the live database the repository versions
    working: DatabaseSnapshot,
    labels: HashMap<String, ObjectId>,
    last_merge: Option<MergeResult>,
    last_bisect: Option<BisectSession>,
    current_step: usize,
}

impl ScenarioRunner {
    /// Create a new runner, optionally seeding the working database
    pub fn new(fixture: Option<&str>) -> Result<Self> {
        let workspace = TestWorkspace::empty()?;
        let clock = MockClock::new();
        let repo = workspace
            .init_repo()?
            .with_time_provider(clock.as_provider());
        let working = match fixture {
            Some(name) => fixture_snapshot(name)?,
            None => DatabaseSnapshot::empty(),
        };

        Ok(Self {
            workspace,
            repo: Some(repo),
            clock,
            author: Author::new("Ada", "ada@example.com"),
            working,
            labels: HashMap::new(),
            last_merge: None,
            last_bisect: None,
            current_step: 0,
        })
    }

    /// Get current step number
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Execute all steps in sequence
    pub fn execute(&mut self, steps: &[ScenarioStep]) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            self.current_step = i;
            self.execute_step(step)
                .with_context(|| format!("Step {}: {:?}", i, step))?;
        }
        Ok(())
    }

    fn repo(&mut self) -> Result<&mut DbvcRepo> {
        self.repo
            .as_mut()
            .ok_or_else(|| anyhow!("Repository not available (crashed?)"))
    }

    fn label(&self, label: &str) -> Result<ObjectId> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| anyhow!("Unknown label '{}'", label))
    }

    /// Execute a single step
    fn execute_step(&mut self, step: &ScenarioStep) -> Result<()> {
        match step {
            ScenarioStep::CreateTable {
                table,
                columns,
                primary_key,
            } => self.handle_create_table(table, columns, primary_key),
            ScenarioStep::InsertRow { table, cells } => {
                let row: Row = cells.iter().cloned().collect();
                self.working.data.entry(table.clone()).or_default().rows.push(row);
                Ok(())
            }
            ScenarioStep::UpdateCell {
                table,
                key,
                column,
                value,
            } => self.handle_update(table, key, column, value.clone()),
            ScenarioStep::DeleteRow { table, key } => self.handle_delete(table, key),

            ScenarioStep::Commit { message, label } => self.handle_commit(message, label.as_deref()),
            ScenarioStep::Label { label } => {
                let head = self.repo()?.head()?.ok_or_else(|| anyhow!("HEAD has no commits"))?;
                self.labels.insert(label.clone(), head);
                Ok(())
            }

            ScenarioStep::CreateBranch { name } => {
                self.repo()?.create_branch(name, None)?;
                Ok(())
            }
            ScenarioStep::Checkout { name } => {
                let snapshot = self.repo()?.checkout(name)?;
                self.working = snapshot.unwrap_or_default();
                Ok(())
            }
            ScenarioStep::DeleteBranch { name, force } => {
                self.repo()?.delete_branch(name, *force)?;
                Ok(())
            }
            ScenarioStep::Protect { name } => {
                self.repo()?.set_branch_protection(name, true)?;
                Ok(())
            }
            ScenarioStep::Merge {
                branch,
                strategy,
                allow_conflicts,
            } => self.handle_merge(branch, *strategy, *allow_conflicts),

            ScenarioStep::StashPush { message } => self.handle_stash_push(message),
            ScenarioStep::StashPop => self.handle_stash_pop(),

            ScenarioStep::BisectStart { good, bad } => {
                let good = self.label(good)?;
                let bad = self.label(bad)?;
                let session = self.repo()?.bisect_start(good, bad)?;
                self.last_bisect = Some(session);
                Ok(())
            }
            ScenarioStep::BisectUntilFound { table, key } => self.handle_bisect_run(table, key),

            ScenarioStep::WaitDays { days } => {
                self.clock.advance_days(*days);
                Ok(())
            }

            ScenarioStep::Crash => {
                // Simulate crash by dropping the handle; the working database survives
                self.repo = None;
                Ok(())
            }
            ScenarioStep::Restart => {
                self.workspace.remove_lock()?;
                let repo = self
                    .workspace
                    .open_repo()?
                    .with_time_provider(self.clock.as_provider());
                self.repo = Some(repo);
                Ok(())
            }

            ScenarioStep::ExpectFailure { step, contains } => match self.execute_step(step) {
                Ok(()) => bail!("Expected {:?} to fail", step),
                Err(e) => {
                    let message = format!("{:#}", e);
                    ensure!(
                        message.contains(contains.as_str()),
                        "Expected error containing {:?}, got: {}",
                        contains,
                        message
                    );
                    Ok(())
                }
            },

            ScenarioStep::Assert { assertion } => self.handle_assertion(assertion),
        }
    }

    // ===== Working database handlers =====

    fn handle_create_table(&mut self, table: &str, columns: &[String], primary_key: &[String]) -> Result<()> {
        let columns = columns
            .iter()
            .map(|c| ColumnDefinition::new(c.as_str(), "text"))
            .collect();
        let pk: Vec<&str> = primary_key.iter().map(String::as_str).collect();
        let working = std::mem::take(&mut self.working);
        self.working = working.with_table(table, TableDefinition::new(columns, &pk));
        Ok(())
    }

    fn handle_update(&mut self, table: &str, key: &str, column: &str, value: Value) -> Result<()> {
        let pk = self.working.primary_key(table).to_vec();
        let row = self
            .working
            .data
            .get_mut(table)
            .and_then(|t| t.rows.iter_mut().find(|r| row_key(r, &pk) == key))
            .ok_or_else(|| anyhow!("No row {} in {}", key, table))?;
        row.insert(column.to_string(), value);
        Ok(())
    }

    fn handle_delete(&mut self, table: &str, key: &str) -> Result<()> {
        let pk = self.working.primary_key(table).to_vec();
        let rows = &mut self
            .working
            .data
            .get_mut(table)
            .ok_or_else(|| anyhow!("No table {}", table))?
            .rows;
        let before = rows.len();
        rows.retain(|r| row_key(r, &pk) != key);
        ensure!(rows.len() < before, "No row {} in {}", key, table);
        Ok(())
    }

    // ===== Repository handlers =====

    fn handle_commit(&mut self, message: &str, label: Option<&str>) -> Result<()> {
        self.clock.advance(Duration::from_secs(1));
        let author = self.author.clone();
        let working = self.working.clone();
        let commit = self.repo()?.commit_snapshot(message, &author, &working)?;
        if let Some(label) = label {
            self.labels.insert(label.to_string(), commit.id);
        }
        Ok(())
    }

    fn handle_merge(
        &mut self,
        branch: &str,
        strategy: Option<MergeStrategy>,
        allow_conflicts: bool,
    ) -> Result<()> {
        self.clock.advance(Duration::from_secs(1));
        let options = MergeOptions {
            strategy,
            allow_conflicts,
            ..Default::default()
        };
        let result = self.repo()?.merge(branch, &options)?;
        if result.success {
            if let Some(snapshot) = &result.snapshot {
                self.working = snapshot.clone();
            }
        }
        self.last_merge = Some(result);
        Ok(())
    }

    fn handle_stash_push(&mut self, message: &str) -> Result<()> {
        self.clock.advance(Duration::from_secs(1));
        let author = self.author.clone();
        let working = self.working.clone();
        let repo = self.repo()?;
        let changes = diff_snapshots(&repo.head_snapshot()?, &working).to_changes();
        repo.stash_push(message, &author, changes, Some(&working))?;
        self.working = self.repo()?.head_snapshot()?;
        Ok(())
    }

    fn handle_stash_pop(&mut self) -> Result<()> {
        let repo = self.repo()?;
        let stash = repo.stash_pop()?;
        let snapshot = repo
            .stash_snapshot(&stash)?
            .ok_or_else(|| anyhow!("Stash {} carries no snapshot", stash.id))?;
        self.working = snapshot;
        Ok(())
    }

    fn handle_bisect_run(&mut self, table: &str, key: &str) -> Result<()> {
        let repo = self.repo()?;
        let mut session = repo
            .bisect_status()?
            .ok_or_else(|| anyhow!("No bisect in progress"))?;
        for _ in 0..MAX_BISECT_ROUNDS {
            if session.status != BisectStatus::Active {
                break;
            }
            let current = session
                .current_commit
                .ok_or_else(|| anyhow!("Active bisect without a current commit"))?;
            session = if repo.snapshot_at(current)?.find_row(table, key).is_some() {
                repo.bisect_bad(None)?
            } else {
                repo.bisect_good(None)?
            };
        }
        self.last_bisect = Some(session);
        Ok(())
    }

    // ===== Assertions =====

    fn handle_assertion(&mut self, assertion: &Assertion) -> Result<()> {
        match assertion {
            Assertion::HeadValid => {
                let repo = self.repo()?;
                let current = repo.current_branch().to_string();
                let branches = repo.list_branches()?;
                ensure!(
                    branches.iter().any(|b| b.name == current),
                    "HEAD names {} but branches are {:?}",
                    current,
                    branches.iter().map(|b| &b.name).collect::<Vec<_>>()
                );
                if let Some(head) = repo.head()? {
                    repo.get_commit(head)?;
                }
            }
            Assertion::CurrentBranch(name) => {
                let current = self.repo()?.current_branch().to_string();
                ensure!(&current == name, "Current branch is {}, expected {}", current, name);
            }
            Assertion::BranchExists(name) => {
                self.repo()?.get_branch(name)?;
            }
            Assertion::BranchMissing(name) => {
                ensure!(self.repo()?.get_branch(name).is_err(), "Branch {} still exists", name);
            }
            Assertion::Branches(expected) => {
                let mut names: Vec<String> =
                    self.repo()?.list_branches()?.into_iter().map(|b| b.name).collect();
                names.sort();
                let mut expected = expected.clone();
                expected.sort();
                ensure!(names == expected, "Branches are {:?}, expected {:?}", names, expected);
            }
            Assertion::BranchAt { branch, label } => {
                let expected = self.label(label)?;
                let actual = self.repo()?.get_branch(branch)?.commit_id;
                ensure!(
                    actual == Some(expected),
                    "{} is at {:?}, expected {} ({})",
                    branch,
                    actual.map(|id| id.short()),
                    label,
                    expected.short()
                );
            }

            Assertion::CommitCount(expected) => {
                let count = self.repo()?.log(&LogOptions::default())?.len();
                ensure!(count == *expected, "Expected {} commits, found {}", expected, count);
            }
            Assertion::HeadMessageContains(text) => {
                let head = self.head_commit()?;
                ensure!(
                    head.message.contains(text.as_str()),
                    "HEAD message {:?} does not contain {:?}",
                    head.message,
                    text
                );
            }
            Assertion::HeadParentCount(expected) => {
                let head = self.head_commit()?;
                ensure!(
                    head.parent_ids.len() == *expected,
                    "HEAD has {} parents, expected {}",
                    head.parent_ids.len(),
                    expected
                );
            }
            Assertion::LinearChain(expected) => {
                let repo = self.repo()?;
                let log = repo.log(&LogOptions::default())?;
                ensure!(log.len() == *expected, "Chain has {} commits, expected {}", log.len(), expected);
                for pair in log.windows(2) {
                    ensure!(
                        pair[0].parent_ids == vec![pair[1].id],
                        "{} is not the sole child of {}",
                        pair[0].id.short(),
                        pair[1].id.short()
                    );
                }
                if let Some(root) = log.last() {
                    ensure!(root.parent_ids.is_empty(), "Root {} has parents", root.id.short());
                }
                ensure!(repo.head()? == log.first().map(|c| c.id), "Branch is not at the newest commit");
            }

            Assertion::RowValue {
                table,
                key,
                column,
                value,
            } => {
                let snapshot = self.repo()?.head_snapshot()?;
                let row = snapshot
                    .find_row(table, key)
                    .ok_or_else(|| anyhow!("No row {} in {}", key, table))?;
                ensure!(
                    row.get(column) == Some(value),
                    "{}[{}].{} is {:?}, expected {:?}",
                    table,
                    key,
                    column,
                    row.get(column),
                    value
                );
            }
            Assertion::RowMissing { table, key } => {
                let snapshot = self.repo()?.head_snapshot()?;
                ensure!(snapshot.find_row(table, key).is_none(), "Row {} still in {}", key, table);
            }
            Assertion::RowCount { table, count } => {
                let snapshot = self.repo()?.head_snapshot()?;
                let actual = snapshot.rows(table).len();
                ensure!(actual == *count, "{} has {} rows, expected {}", table, actual, count);
            }
            Assertion::WorkingMatchesHead => {
                let head = self.repo()?.head_snapshot()?;
                let diff = diff_snapshots(&head, &self.working);
                ensure!(diff.is_empty(), "Working database differs from HEAD: {:?}", diff.summary);
            }

            Assertion::LastMerge { kind, success } => {
                let merge = self
                    .last_merge
                    .as_ref()
                    .ok_or_else(|| anyhow!("No merge has run"))?;
                ensure!(
                    merge.kind == *kind && merge.success == *success,
                    "Merge was {:?} (success {}), expected {:?} (success {})",
                    merge.kind,
                    merge.success,
                    kind,
                    success
                );
            }
            Assertion::LastMergeConflictsGte(count) => {
                let merge = self
                    .last_merge
                    .as_ref()
                    .ok_or_else(|| anyhow!("No merge has run"))?;
                ensure!(
                    merge.conflicts.len() >= *count,
                    "Merge reported {} conflicts, expected at least {}",
                    merge.conflicts.len(),
                    count
                );
            }
            Assertion::DiffMirrors { from, to } => {
                let from = self.label(from)?;
                let to = self.label(to)?;
                let repo = self.repo()?;
                let forward = repo.diff(from, to)?;
                let backward = repo.diff(to, from)?;
                ensure!(forward.total_changes() == backward.total_changes(), "Change counts differ");
                ensure!(
                    forward.summary.insertions == backward.summary.deletions
                        && forward.summary.deletions == backward.summary.insertions
                        && forward.summary.modifications == backward.summary.modifications,
                    "Summaries do not mirror: {:?} vs {:?}",
                    forward.summary,
                    backward.summary
                );
                for change in &forward.data_changes {
                    ensure!(
                        backward.data_changes.iter().any(|b| b.table == change.table
                            && b.key == change.key
                            && b.operation == change.operation.inverse()
                            && b.old_values == change.new_values
                            && b.new_values == change.old_values),
                        "No mirror for {} {}[{}]",
                        change.operation,
                        change.table,
                        change.key
                    );
                }
            }
            Assertion::BisectFound { label, max_steps } => {
                let expected = self.label(label)?;
                let session = self
                    .last_bisect
                    .as_ref()
                    .ok_or_else(|| anyhow!("No bisect has run"))?;
                ensure!(session.status == BisectStatus::Found, "Bisect is {:?}", session.status);
                ensure!(
                    session.first_bad_commit == Some(expected),
                    "First bad commit is {:?}, expected {} ({})",
                    session.first_bad_commit.map(|id| id.short()),
                    label,
                    expected.short()
                );
                ensure!(
                    session.steps <= *max_steps,
                    "Bisect took {} steps, expected at most {}",
                    session.steps,
                    max_steps
                );
            }
            Assertion::NoBisect => {
                ensure!(self.repo()?.bisect_status()?.is_none(), "A bisect session is still active");
            }
            Assertion::StashCount(expected) => {
                let count = self.repo()?.stash_list()?.len();
                ensure!(count == *expected, "Expected {} stashes, found {}", expected, count);
            }
            Assertion::VerifyClean => {
                let report = self.repo()?.verify(&VerifyConfig::default())?;
                ensure!(!report.has_issues(), "Verify found issues: {:?}", report.issues);
            }

            Assertion::Custom(check) => {
                let repo = self.repo()?;
                check(repo)?;
            }
        }
        Ok(())
    }

    fn head_commit(&mut self) -> Result<Commit> {
        let repo = self.repo()?;
        let head = repo.head()?.ok_or_else(|| anyhow!("HEAD has no commits"))?;
        Ok(repo.get_commit(head)?)
    }
}
