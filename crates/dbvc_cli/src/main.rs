//! dbvc CLI - Command-line interface for database version control.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use dbvc_core::{DbvcError, MergeStrategy};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "dbvc")]
#[command(about = "Git-style version control for database snapshots", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Conflict strategy as accepted on the command line.
#[derive(Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    Recursive,
    Ours,
    Theirs,
}

impl From<StrategyArg> for MergeStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Recursive => MergeStrategy::Recursive,
            StrategyArg::Ours => MergeStrategy::Ours,
            StrategyArg::Theirs => MergeStrategy::Theirs,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new dbvc repository
    Init,
    /// Record a snapshot on the current branch
    Commit {
        /// Commit message
        #[arg(short, long)]
        message: String,
        /// Snapshot document (JSON)
        #[arg(short, long)]
        snapshot: PathBuf,
        /// Author as "Name <email>" (default: [user] in config)
        #[arg(long)]
        author: Option<String>,
    },
    /// Show commit history
    Log {
        /// Revision to start from (default: HEAD)
        rev: Option<String>,
        /// Maximum number of commits
        #[arg(short = 'n', long)]
        max_count: Option<usize>,
        /// Only commits whose author matches
        #[arg(long)]
        author: Option<String>,
        /// One line per commit
        #[arg(long)]
        oneline: bool,
    },
    /// Show a commit and its changes
    Show {
        /// Revision (default: HEAD)
        rev: Option<String>,
        /// Print the commit's snapshot document instead
        #[arg(long)]
        snapshot: bool,
    },
    /// List, create, delete or configure branches
    Branch {
        #[command(subcommand)]
        command: Option<BranchCommands>,
    },
    /// Switch branches
    Checkout {
        /// Branch name
        branch: String,
        /// Write the branch's snapshot document here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List, create or delete tags
    Tag {
        #[command(subcommand)]
        command: Option<TagCommands>,
    },
    /// Merge a branch into the current branch
    Merge {
        /// Branch to merge
        branch: String,
        /// Conflict strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Always create a merge commit
        #[arg(long)]
        no_ff: bool,
        /// Commit even with unresolved conflicts
        #[arg(long)]
        allow_conflicts: bool,
        /// Merge commit message
        #[arg(short, long)]
        message: Option<String>,
        /// Write the merged snapshot document here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Apply one commit on top of the current branch
    CherryPick {
        /// Revision to pick
        rev: String,
        /// Conflict strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Don't commit; print the resulting snapshot
        #[arg(long)]
        no_commit: bool,
    },
    /// Replay the current branch on top of another
    Rebase {
        /// Upstream branch
        upstream: String,
        /// Conflict strategy for each replayed commit
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },
    /// Move the current branch to a revision
    Reset {
        /// Target revision
        rev: String,
    },
    /// Compare two revisions
    Diff {
        /// Older revision (default: HEAD~1)
        from: Option<String>,
        /// Newer revision (default: HEAD)
        to: Option<String>,
        /// Print row and column details
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show which commits changed a table, column or row
    Blame {
        /// Table name
        table: String,
        /// Blame one column
        #[arg(long, conflicts_with = "row")]
        column: Option<String>,
        /// Blame one row key (e.g. "id=1")
        #[arg(long)]
        row: Option<String>,
        /// Revision to blame from (default: HEAD)
        #[arg(long)]
        rev: Option<String>,
    },
    /// List authors of the commits that touched a table, by commit count
    Contributors {
        /// Table name
        table: String,
        /// Count only commits touching this column
        #[arg(long)]
        column: Option<String>,
        /// Revision to start from (default: HEAD)
        #[arg(long)]
        rev: Option<String>,
    },
    /// Binary search for the commit that introduced a problem
    Bisect {
        #[command(subcommand)]
        command: BisectCommands,
    },
    /// Park uncommitted changes
    Stash {
        #[command(subcommand)]
        command: StashCommands,
    },
    /// Show ref movements
    Reflog {
        /// Only entries for this ref
        #[arg(long = "ref")]
        ref_name: Option<String>,
        /// Maximum number of entries
        #[arg(short = 'n', long)]
        max_count: Option<usize>,
    },
    /// Export or apply patches
    Patch {
        #[command(subcommand)]
        command: PatchCommands,
    },
    /// Verify repository integrity
    Verify {
        /// Skip loading and hashing snapshots
        #[arg(long)]
        quick: bool,
    },
    /// Garbage collect unreachable objects
    Gc {
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
        /// Skip grace period, delete immediately
        #[arg(long)]
        aggressive: bool,
        /// Grace period in days (default: core.gc_grace_period_days)
        #[arg(long)]
        grace_days: Option<u32>,
        /// Don't ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum BranchCommands {
    /// List branches
    List,
    /// Create a branch
    Create {
        /// Branch name
        name: String,
        /// Start point (default: HEAD)
        #[arg(long)]
        from: Option<String>,
    },
    /// Delete a branch
    Delete {
        /// Branch name
        name: String,
        /// Delete even if protected or unmerged
        #[arg(short, long)]
        force: bool,
    },
    /// Rename a branch
    Rename {
        /// Current name
        old: String,
        /// New name
        new: String,
    },
    /// Protect a branch from deletion
    Protect {
        /// Branch name
        name: String,
    },
    /// Remove deletion protection
    Unprotect {
        /// Branch name
        name: String,
    },
    /// Set or clear a branch's upstream
    Upstream {
        /// Branch name
        name: String,
        /// Upstream branch (omit to clear)
        upstream: Option<String>,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// List tags
    List {
        /// Glob filter (`*` and `?`)
        filter: Option<String>,
    },
    /// Create a tag
    Create {
        /// Tag name
        name: String,
        /// Revision (default: HEAD)
        rev: Option<String>,
        /// Annotation message
        #[arg(short, long)]
        message: Option<String>,
        /// Tagger as "Name <email>" for annotated tags
        #[arg(long)]
        author: Option<String>,
    },
    /// Delete a tag
    Delete {
        /// Tag name
        name: String,
    },
}

#[derive(Subcommand)]
enum BisectCommands {
    /// Start bisecting
    Start {
        /// Known good revision
        good: String,
        /// Known bad revision
        bad: String,
    },
    /// Mark a commit good (default: current)
    Good {
        /// Revision
        rev: Option<String>,
    },
    /// Mark a commit bad (default: current)
    Bad {
        /// Revision
        rev: Option<String>,
    },
    /// Skip a commit (default: current)
    Skip {
        /// Revision
        rev: Option<String>,
    },
    /// Abort the session
    Reset,
    /// Show the session
    Status,
}

#[derive(Subcommand)]
enum StashCommands {
    /// Stash the difference between HEAD and a snapshot
    Push {
        /// Description
        #[arg(short, long)]
        message: String,
        /// Snapshot document with the uncommitted state
        #[arg(short, long)]
        snapshot: PathBuf,
        /// Author as "Name <email>"
        #[arg(long)]
        author: Option<String>,
    },
    /// Remove the most recent stash and print its snapshot
    Pop {
        /// Write the snapshot document here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a stash's snapshot without removing it
    Apply {
        /// Stash id (default: most recent)
        id: Option<String>,
        /// Write the snapshot document here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List stashes
    List,
    /// Remove one stash
    Drop {
        /// Stash id
        id: String,
    },
    /// Remove every stash
    Clear,
}

#[derive(Subcommand)]
enum PatchCommands {
    /// Export commits as a patch
    Export {
        /// Last revision to include
        to: String,
        /// Exclusive start revision (default: whole history, or the
        /// commit alone with --single)
        #[arg(long)]
        from: Option<String>,
        /// Only the `to` commit
        #[arg(long, conflicts_with = "from")]
        single: bool,
        /// Write the patch here
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Human-readable text instead of JSON
        #[arg(long)]
        text: bool,
    },
    /// Apply a JSON patch
    Apply {
        /// Patch file
        file: PathBuf,
        /// Validate only
        #[arg(long)]
        check: bool,
    },
}

fn main() {
    // Respects RUST_LOG (e.g., RUST_LOG=dbvc_core=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli.command) {
        eprintln!("{} {:#}", style("error:").red().bold(), err);
        let hint = err
            .chain()
            .find_map(|e| e.downcast_ref::<DbvcError>())
            .and_then(|e| e.recovery_suggestion());
        if let Some(hint) = hint {
            eprintln!("{} {}", style("hint:").cyan(), hint);
        }
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Init => commands::init::run(),
        Commands::Commit {
            message,
            snapshot,
            author,
        } => commands::commit::run(&message, &snapshot, author.as_deref()),
        Commands::Log {
            rev,
            max_count,
            author,
            oneline,
        } => commands::log::log(rev, max_count, author, oneline),
        Commands::Show { rev, snapshot } => commands::log::show(rev.as_deref(), snapshot),
        Commands::Branch { command } => match command.unwrap_or(BranchCommands::List) {
            BranchCommands::List => commands::branch::list(),
            BranchCommands::Create { name, from } => commands::branch::create(&name, from.as_deref()),
            BranchCommands::Delete { name, force } => commands::branch::delete(&name, force),
            BranchCommands::Rename { old, new } => commands::branch::rename(&old, &new),
            BranchCommands::Protect { name } => commands::branch::protect(&name, true),
            BranchCommands::Unprotect { name } => commands::branch::protect(&name, false),
            BranchCommands::Upstream { name, upstream } => {
                commands::branch::upstream(&name, upstream.as_deref())
            }
        },
        Commands::Checkout { branch, output } => commands::branch::checkout(&branch, output.as_deref()),
        Commands::Tag { command } => match command.unwrap_or(TagCommands::List { filter: None }) {
            TagCommands::List { filter } => commands::tag::list(filter.as_deref()),
            TagCommands::Create {
                name,
                rev,
                message,
                author,
            } => commands::tag::create(&name, rev.as_deref(), message.as_deref(), author.as_deref()),
            TagCommands::Delete { name } => commands::tag::delete(&name),
        },
        Commands::Merge {
            branch,
            strategy,
            no_ff,
            allow_conflicts,
            message,
            output,
        } => commands::merge::merge(
            &branch,
            strategy.map(Into::into),
            no_ff,
            allow_conflicts,
            message,
            output.as_deref(),
        ),
        Commands::CherryPick {
            rev,
            strategy,
            no_commit,
        } => commands::merge::cherry_pick(&rev, strategy.map(Into::into), no_commit),
        Commands::Rebase { upstream, strategy } => {
            commands::merge::rebase(&upstream, strategy.map(Into::into))
        }
        Commands::Reset { rev } => commands::merge::reset(&rev),
        Commands::Diff { from, to, verbose } => {
            commands::diff::diff(from.as_deref(), to.as_deref(), verbose)
        }
        Commands::Blame {
            table,
            column,
            row,
            rev,
        } => commands::diff::blame(&table, column.as_deref(), row.as_deref(), rev.as_deref()),
        Commands::Contributors { table, column, rev } => {
            commands::diff::contributors(&table, column.as_deref(), rev.as_deref())
        }
        Commands::Bisect { command } => match command {
            BisectCommands::Start { good, bad } => commands::bisect::start(&good, &bad),
            BisectCommands::Good { rev } => commands::bisect::good(rev.as_deref()),
            BisectCommands::Bad { rev } => commands::bisect::bad(rev.as_deref()),
            BisectCommands::Skip { rev } => commands::bisect::skip(rev.as_deref()),
            BisectCommands::Reset => commands::bisect::reset(),
            BisectCommands::Status => commands::bisect::status(),
        },
        Commands::Stash { command } => match command {
            StashCommands::Push {
                message,
                snapshot,
                author,
            } => commands::stash::push(&message, &snapshot, author.as_deref()),
            StashCommands::Pop { output } => commands::stash::pop(output.as_deref()),
            StashCommands::Apply { id, output } => {
                commands::stash::apply(id.as_deref(), output.as_deref())
            }
            StashCommands::List => commands::stash::list(),
            StashCommands::Drop { id } => commands::stash::drop(&id),
            StashCommands::Clear => commands::stash::clear(),
        },
        Commands::Reflog {
            ref_name,
            max_count,
        } => commands::reflog::run(ref_name, max_count),
        Commands::Patch { command } => match command {
            PatchCommands::Export {
                to,
                from,
                single,
                output,
                text,
            } => commands::patch::export(&to, from.as_deref(), single, output.as_deref(), text),
            PatchCommands::Apply { file, check } => commands::patch::apply(&file, check),
        },
        Commands::Verify { quick } => commands::verify::run(quick),
        Commands::Gc {
            dry_run,
            aggressive,
            grace_days,
            yes,
        } => commands::gc::run(dry_run, aggressive, grace_days, yes),
    }
}
