//! End-to-end scenarios over a real on-disk repository.

mod harness;
mod scenarios;
