//! Patch export and apply.

use super::{open_repo, resolve_or_head};
use anyhow::{bail, Context, Result};
use console::style;
use dbvc_core::{export_patch, ApplyPatchOptions, Patch};
use std::fs;
use std::path::Path;

/// Export one commit, or a `from..to` range, as a patch.
pub fn export(to: &str, from: Option<&str>, single: bool, output: Option<&Path>, text: bool) -> Result<()> {
    let repo = open_repo()?;
    let to = resolve_or_head(&repo, Some(to))?;
    let patch = if single {
        repo.generate_patch(to)?
    } else {
        let from = match from {
            Some(rev) => Some(resolve_or_head(&repo, Some(rev))?),
            None => None,
        };
        repo.generate_patch_range(from, to)?
    };

    let content = if text { export_patch(&patch) } else { patch.to_json()? };
    match output {
        Some(path) => {
            fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} Wrote {} commit(s) to {}",
                style("✓").green(),
                patch.commits.len(),
                path.display()
            );
        }
        None => println!("{}", content),
    }
    Ok(())
}

/// Import a JSON patch's commits into the object store.
pub fn apply(file: &Path, check: bool) -> Result<()> {
    let mut repo = open_repo()?;
    let json = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let patch = Patch::from_json(&json)?;
    let result = repo.apply_patch(&patch, &ApplyPatchOptions { check })?;

    for conflict in &result.conflicts {
        println!(
            "  {} {}: {}",
            style("×").red(),
            conflict.commit_id.short(),
            conflict.reason
        );
    }
    if !result.is_clean() {
        bail!("{} of {} commit(s) rejected", result.failed_patches, patch.commits.len());
    }

    let verb = if check { "would apply" } else { "applied" };
    println!("{} {} {} commit(s)", style("✓").green(), verb, result.applied_patches);
    if let Some(last) = result.applied.last() {
        if !check {
            println!("  Tip is {}; use 'dbvc reset' or 'dbvc branch create --from' to adopt it", last.short());
        }
    }
    Ok(())
}
