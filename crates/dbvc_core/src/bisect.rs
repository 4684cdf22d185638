//! Binary search over history for the first bad commit.
//!
//! A session is persisted through the storage provider, so it survives
//! across repository handles (and CLI invocations).

use crate::error::{DbvcError, Result};
use crate::object_id::ObjectId;
use crate::repo::DbvcRepo;
use crate::storage::StorageProvider;
use crate::types::{BisectSession, BisectStatus};
use tracing::{debug, info};

/// Which verdict a commit received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Good,
    Bad,
    Skip,
}

impl<S: StorageProvider> DbvcRepo<S> {
    /// Starts bisecting between a known `good` commit and a known `bad` one.
    ///
    /// Candidates are the ancestors of `bad` (inclusive) that are not
    /// ancestors of `good`, oldest first. `good` must be a strict ancestor
    /// of `bad`.
    pub fn bisect_start(&mut self, good: ObjectId, bad: ObjectId) -> Result<BisectSession> {
        let _lock = self.storage.lock()?;
        if let Some(session) = self.storage.get_bisect()? {
            if session.status == BisectStatus::Active {
                return Err(DbvcError::BisectAlreadyActive(session.started_at.to_string()));
            }
        }

        let graph = self.graph();
        graph.commit(good)?;
        graph.commit(bad)?;
        if good == bad || !graph.is_ancestor(good, bad)? {
            return Err(DbvcError::InvalidBisectRange(format!(
                "{} is not an ancestor of {}",
                good.short(),
                bad.short()
            )));
        }

        let remaining: Vec<ObjectId> = graph
            .commits_between(Some(good), bad)?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let mut session = BisectSession {
            id: uuid::Uuid::new_v4().to_string(),
            good_commits: vec![good],
            bad_commits: vec![bad],
            current_commit: None,
            remaining_commits: remaining,
            skipped_commits: Vec::new(),
            status: BisectStatus::Active,
            first_bad_commit: None,
            steps: 0,
            started_at: self.now(),
        };
        info!(
            good = %good,
            bad = %bad,
            candidates = session.remaining_commits.len(),
            "Bisect started"
        );
        self.advance(&mut session)?;
        Ok(session)
    }

    /// Marks a commit (default: the current one) good.
    pub fn bisect_good(&mut self, commit: Option<ObjectId>) -> Result<BisectSession> {
        self.bisect_mark(commit, Verdict::Good)
    }

    /// Marks a commit (default: the current one) bad.
    pub fn bisect_bad(&mut self, commit: Option<ObjectId>) -> Result<BisectSession> {
        self.bisect_mark(commit, Verdict::Bad)
    }

    /// Drops a commit (default: the current one) from the search without a
    /// verdict.
    pub fn bisect_skip(&mut self, commit: Option<ObjectId>) -> Result<BisectSession> {
        self.bisect_mark(commit, Verdict::Skip)
    }

    /// Aborts any session. Returns it, marked `Aborted`, if there was one.
    pub fn bisect_reset(&mut self) -> Result<Option<BisectSession>> {
        let _lock = self.storage.lock()?;
        let session = self.storage.get_bisect()?;
        self.storage.clear_bisect()?;
        Ok(session.map(|mut s| {
            info!(session = %s.id, "Bisect reset");
            s.status = BisectStatus::Aborted;
            s
        }))
    }

    /// The active session, if any.
    pub fn bisect_status(&self) -> Result<Option<BisectSession>> {
        self.storage.get_bisect()
    }

    fn bisect_mark(&mut self, commit: Option<ObjectId>, verdict: Verdict) -> Result<BisectSession> {
        let _lock = self.storage.lock()?;
        let mut session = self
            .storage
            .get_bisect()?
            .filter(|s| s.status == BisectStatus::Active)
            .ok_or(DbvcError::NoBisectSession)?;
        let target = commit
            .or(session.current_commit)
            .ok_or(DbvcError::NoBisectSession)?;
        let in_range = [
            &session.remaining_commits,
            &session.good_commits,
            &session.bad_commits,
            &session.skipped_commits,
        ]
        .iter()
        .any(|ids| ids.contains(&target));
        if !in_range {
            return Err(DbvcError::InvalidBisectRange(format!(
                "{} is not a candidate of this session",
                target.short()
            )));
        }

        let graph = self.graph();
        match verdict {
            Verdict::Good => {
                let ancestors = graph.ancestors(target)?;
                session.remaining_commits.retain(|id| !ancestors.contains(id));
                session.good_commits.push(target);
            }
            Verdict::Bad => {
                let ancestors = graph.ancestors(target)?;
                session.remaining_commits.retain(|id| ancestors.contains(id));
                session.bad_commits.push(target);
            }
            Verdict::Skip => {
                graph.commit(target)?;
                session.remaining_commits.retain(|id| *id != target);
                session.skipped_commits.push(target);
            }
        }
        session.steps += 1;
        debug!(
            commit = %target,
            verdict = ?verdict,
            remaining = session.remaining_commits.len(),
            "Bisect step"
        );

        self.advance(&mut session)?;
        Ok(session)
    }

    /// Concludes the session or picks the next midpoint, then persists.
    fn advance(&self, session: &mut BisectSession) -> Result<()> {
        if session.remaining_commits.len() <= 1 {
            session.status = BisectStatus::Found;
            session.current_commit = None;
            session.first_bad_commit = session
                .remaining_commits
                .first()
                .or(session.bad_commits.last())
                .copied();
            self.storage.clear_bisect()?;
            if let Some(found) = session.first_bad_commit {
                info!(commit = %found, steps = session.steps, "Bisect found first bad commit");
            }
            return Ok(());
        }

        let mid = (session.remaining_commits.len() - 1) / 2;
        session.current_commit = Some(session.remaining_commits[mid]);
        self.storage.save_bisect(session)
    }
}
