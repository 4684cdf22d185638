//! Tag management.

use super::{author, format_time, open_repo, resolve_or_head};
use anyhow::Result;
use console::style;
use dbvc_core::TagKind;

/// List tags matching an optional glob.
pub fn list(filter: Option<&str>) -> Result<()> {
    let repo = open_repo()?;
    for tag in repo.list_tags(filter)? {
        match tag.kind {
            TagKind::Lightweight => println!("{} {}", style(&tag.name).green(), tag.commit_id.short()),
            TagKind::Annotated => println!(
                "{} {} {} ({})",
                style(&tag.name).green(),
                tag.commit_id.short(),
                tag.message.as_deref().unwrap_or_default(),
                format_time(tag.created_at)
            ),
        }
    }
    Ok(())
}

/// Create a tag; annotated when a message is given.
pub fn create(name: &str, rev: Option<&str>, message: Option<&str>, author_arg: Option<&str>) -> Result<()> {
    let mut repo = open_repo()?;
    let target = resolve_or_head(&repo, rev)?;
    let tagger = match message {
        Some(_) => Some(author(&repo, author_arg)?),
        None => None,
    };
    let tag = repo.create_tag(name, Some(target), message, tagger.as_ref())?;
    println!("Tagged {} as {}", tag.commit_id.short(), style(&tag.name).green());
    Ok(())
}

/// Delete a tag.
pub fn delete(name: &str) -> Result<()> {
    let mut repo = open_repo()?;
    repo.delete_tag(name)?;
    println!("Deleted tag {}", name);
    Ok(())
}
