use anyhow::Result;
use dbvc_core::{DbvcRepo, MergeKind, Value};

/// Declarative assertions on repository state.
pub enum Assertion {
    // Refs
    HeadValid,
    CurrentBranch(String),
    BranchExists(String),
    BranchMissing(String),
    Branches(Vec<String>),
    BranchAt {
        branch: String,
        label: String,
    },

    // History
    CommitCount(usize),
    HeadMessageContains(String),
    HeadParentCount(usize),
    LinearChain(usize),

    // Head snapshot contents
    RowValue {
        table: String,
        key: String,
        column: String,
        value: Value,
    },
    RowMissing {
        table: String,
        key: String,
    },
    RowCount {
        table: String,
        count: usize,
    },
    WorkingMatchesHead,

    // Operations
    LastMerge {
        kind: MergeKind,
        success: bool,
    },
    LastMergeConflictsGte(usize),
    DiffMirrors {
        from: String,
        to: String,
    },
    BisectFound {
        label: String,
        max_steps: u32,
    },
    NoBisect,
    StashCount(usize),
    VerifyClean,

    // Custom (takes mutable reference to allow mutations)
    Custom(Box<dyn Fn(&mut DbvcRepo) -> Result<()> + Send + Sync>),
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HeadValid => write!(f, "HeadValid"),
            Self::CurrentBranch(b) => write!(f, "CurrentBranch({:?})", b),
            Self::BranchExists(b) => write!(f, "BranchExists({:?})", b),
            Self::BranchMissing(b) => write!(f, "BranchMissing({:?})", b),
            Self::Branches(b) => write!(f, "Branches({:?})", b),
            Self::BranchAt { branch, label } => {
                write!(f, "BranchAt {{ branch: {:?}, label: {:?} }}", branch, label)
            }
            Self::CommitCount(n) => write!(f, "CommitCount({})", n),
            Self::HeadMessageContains(s) => write!(f, "HeadMessageContains({:?})", s),
            Self::HeadParentCount(n) => write!(f, "HeadParentCount({})", n),
            Self::LinearChain(n) => write!(f, "LinearChain({})", n),
            Self::RowValue {
                table,
                key,
                column,
                value,
            } => write!(
                f,
                "RowValue {{ table: {:?}, key: {:?}, column: {:?}, value: {:?} }}",
                table, key, column, value
            ),
            Self::RowMissing { table, key } => {
                write!(f, "RowMissing {{ table: {:?}, key: {:?} }}", table, key)
            }
            Self::RowCount { table, count } => {
                write!(f, "RowCount {{ table: {:?}, count: {} }}", table, count)
            }
            Self::WorkingMatchesHead => write!(f, "WorkingMatchesHead"),
            Self::LastMerge { kind, success } => {
                write!(f, "LastMerge {{ kind: {:?}, success: {} }}", kind, success)
            }
            Self::LastMergeConflictsGte(n) => write!(f, "LastMergeConflictsGte({})", n),
            Self::DiffMirrors { from, to } => {
                write!(f, "DiffMirrors {{ from: {:?}, to: {:?} }}", from, to)
            }
            Self::BisectFound { label, max_steps } => {
                write!(f, "BisectFound {{ label: {:?}, max_steps: {} }}", label, max_steps)
            }
            Self::NoBisect => write!(f, "NoBisect"),
            Self::StashCount(n) => write!(f, "StashCount({})", n),
            Self::VerifyClean => write!(f, "VerifyClean"),
            Self::Custom(_) => write!(f, "Custom(<fn>)"),
        }
    }
}
