mod bisect;
mod branching;
mod history;
mod merging;
mod recovery;
mod stash;
